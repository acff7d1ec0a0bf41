//! Optimizers selectable by name
//!
//! SGD, Adam and AdamW come from `candle-nn`; RMSprop is implemented here on
//! the same [`Optimizer`] trait.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use ptts_config::OptimizerKind;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsRmsProp {
    pub lr: f64,
    /// Smoothing constant of the squared-gradient average
    pub alpha: f64,
    pub eps: f64,
}

impl Default for ParamsRmsProp {
    fn default() -> Self {
        Self {
            lr: 0.01,
            alpha: 0.99,
            eps: 1e-8,
        }
    }
}

/// RMSprop without momentum or centering
#[derive(Debug)]
pub struct RmsProp {
    vars: Vec<(Var, Var)>,
    params: ParamsRmsProp,
}

impl Optimizer for RmsProp {
    type Config = ParamsRmsProp;

    fn new(vars: Vec<Var>, params: ParamsRmsProp) -> candle_core::Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|v| v.dtype().is_float())
            .map(|v| {
                let square_avg = Var::zeros(v.shape(), v.dtype(), v.device())?;
                Ok((v, square_avg))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        let ParamsRmsProp { lr, alpha, eps } = self.params;
        for (var, square_avg) in &self.vars {
            let Some(grad) = grads.get(var) else {
                continue;
            };
            let avg = square_avg
                .as_tensor()
                .affine(alpha, 0.0)?
                .add(&grad.sqr()?.affine(1.0 - alpha, 0.0)?)?;
            let update = grad.div(&avg.sqrt()?.affine(1.0, eps)?)?;
            var.set(&var.as_tensor().sub(&update.affine(lr, 0.0)?)?)?;
            square_avg.set(&avg)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }
}

/// The optimizer picked by [`OptimizerKind`]
pub enum TrainOptimizer {
    Sgd(SGD),
    AdamW(AdamW),
    RmsProp(RmsProp),
}

impl TrainOptimizer {
    /// `Adam` is AdamW with zero weight decay
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, lr: f64) -> Result<Self> {
        let optimizer = match kind {
            OptimizerKind::Sgd => Self::Sgd(SGD::new(vars, lr)?),
            OptimizerKind::Adam => Self::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?),
            OptimizerKind::AdamW => Self::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    ..Default::default()
                },
            )?),
            OptimizerKind::RmsProp => Self::RmsProp(RmsProp::new(
                vars,
                ParamsRmsProp {
                    lr,
                    ..Default::default()
                },
            )?),
        };
        tracing::info!(optimizer = kind.as_str(), lr, "Created optimizer");
        Ok(optimizer)
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::Sgd(o) => o.backward_step(loss)?,
            Self::AdamW(o) => o.backward_step(loss)?,
            Self::RmsProp(o) => o.backward_step(loss)?,
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd(o) => o.learning_rate(),
            Self::AdamW(o) => o.learning_rate(),
            Self::RmsProp(o) => o.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Sgd(o) => o.set_learning_rate(lr),
            Self::AdamW(o) => o.set_learning_rate(lr),
            Self::RmsProp(o) => o.set_learning_rate(lr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn quadratic_step(kind: OptimizerKind) -> (f32, f32) {
        let w = Var::from_slice(&[2.0f32], 1, &Device::Cpu).unwrap();
        let mut opt = TrainOptimizer::new(kind, vec![w.clone()], 0.1).unwrap();
        let before = w.as_tensor().to_vec1::<f32>().unwrap()[0];
        let loss = w.as_tensor().sqr().unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        let after = w.as_tensor().to_vec1::<f32>().unwrap()[0];
        (before, after)
    }

    #[test]
    fn test_every_optimizer_descends() {
        for kind in [
            OptimizerKind::Sgd,
            OptimizerKind::Adam,
            OptimizerKind::AdamW,
            OptimizerKind::RmsProp,
        ] {
            let (before, after) = quadratic_step(kind);
            assert!(after < before, "{kind} did not descend");
        }
    }

    #[test]
    fn test_rmsprop_first_step() {
        // avg = 0.01 * g^2, update = g / sqrt(avg) = 10 (sign of g)
        let w = Var::from_slice(&[1.0f32], 1, &Device::Cpu).unwrap();
        let mut opt = RmsProp::new(vec![w.clone()], ParamsRmsProp { lr: 0.01, ..Default::default() }).unwrap();
        let loss = w.as_tensor().sqr().unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        let after = w.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((after - 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_learning_rate_update() {
        let w = Var::zeros(3, DType::F32, &Device::Cpu).unwrap();
        let mut opt = TrainOptimizer::new(OptimizerKind::RmsProp, vec![w], 0.5).unwrap();
        assert_eq!(opt.learning_rate(), 0.5);
        opt.set_learning_rate(0.25);
        assert_eq!(opt.learning_rate(), 0.25);
    }
}
