//! Recurrent carry between consecutive chunks

use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::LSTMState;

use crate::error::{ModelError, Result};

/// Per-layer LSTM `(h, c)`, each `(B, rnn_size)`
///
/// Owned by the caller: passed into every forward call and returned updated.
#[derive(Debug, Clone)]
pub struct RecurrentState {
    layers: Vec<LSTMState>,
}

impl RecurrentState {
    pub fn zeros(layers: usize, batch: usize, hidden: usize, device: &Device) -> Result<Self> {
        let layers = (0..layers)
            .map(|_| -> Result<LSTMState> {
                let h = Tensor::zeros((batch, hidden), DType::F32, device)?;
                let c = Tensor::zeros((batch, hidden), DType::F32, device)?;
                Ok(LSTMState::new(h, c))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub(crate) fn from_layers(layers: Vec<LSTMState>) -> Self {
        Self { layers }
    }

    pub fn layer(&self, index: usize) -> &LSTMState {
        &self.layers[index]
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn batch_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.h().dims()[0])
    }

    /// Zero the rows flagged in `resets`
    pub fn reset_rows(&self, resets: &[bool]) -> Result<Self> {
        if resets.len() != self.batch_size() {
            return Err(ModelError::StateShape {
                state: self.batch_size(),
                batch: resets.len(),
            });
        }
        if !resets.iter().any(|&r| r) {
            return Ok(self.clone());
        }
        let Some(first) = self.layers.first() else {
            return Ok(self.clone());
        };
        let keep: Vec<f32> = resets.iter().map(|&r| if r { 0.0 } else { 1.0 }).collect();
        let keep = Tensor::from_vec(keep, (resets.len(), 1), first.h().device())?;

        let layers = self
            .layers
            .iter()
            .map(|l| -> Result<LSTMState> {
                Ok(LSTMState::new(
                    l.h().broadcast_mul(&keep)?,
                    l.c().broadcast_mul(&keep)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Cut the autograd history (truncated back-propagation)
    pub fn detach(&self) -> Self {
        let layers = self
            .layers
            .iter()
            .map(|l| LSTMState::new(l.h().detach(), l.c().detach()))
            .collect();
        Self { layers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_rows() {
        let device = Device::Cpu;
        let ones = Tensor::ones((3, 2), DType::F32, &device).unwrap();
        let state = RecurrentState::from_layers(vec![LSTMState::new(ones.clone(), ones)]);
        let reset = state.reset_rows(&[false, true, false]).unwrap();
        let h: Vec<Vec<f32>> = reset.layer(0).h().to_vec2().unwrap();
        assert_eq!(h, vec![vec![1.0, 1.0], vec![0.0, 0.0], vec![1.0, 1.0]]);
        assert!(state.reset_rows(&[true]).is_err());
    }

    #[test]
    fn test_zeros_shape() {
        let state = RecurrentState::zeros(2, 4, 8, &Device::Cpu).unwrap();
        assert_eq!(state.num_layers(), 2);
        assert_eq!(state.batch_size(), 4);
        assert_eq!(state.detach().layer(1).c().dims(), &[4, 8]);
    }
}
