//! Recurrent sequence model shared by the duration and acoustic variants
//!
//! Architecture:
//! `Linear(emb) -> activation -> [LayerNorm] -> Dropout -> LSTM x N -> Dropout -> head -> output activation`
//!
//! The LSTM stack is unrolled step by step. Steps past a row's length leave
//! that row's state untouched, so the returned [`RecurrentState`] is the
//! state at each row's last real step and chunked forwards compose exactly.

use candle_core::{DType, Device, IndexOp, Module, Tensor, Var, D};
use candle_nn::rnn::{lstm, LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::{layer_norm, linear, Dropout, LayerNorm, Linear, VarBuilder, VarMap};
use ptts_config::{EmbActivation, OutputActivation};
use ptts_core::DataError;
use ptts_data::{Batch, TargetCodec};
use rand::rngs::StdRng;

use crate::error::Result;
use crate::heads::OutputHeads;
use crate::init::seeded_init;
use crate::spec::ModelSpec;
use crate::state::RecurrentState;

const LAYER_NORM_EPS: f64 = 1e-5;

pub struct SequenceModel {
    spec: ModelSpec,
    codec: TargetCodec,
    device: Device,
    varmap: VarMap,
    embedding: Linear,
    emb_norm: Option<LayerNorm>,
    lstms: Vec<LSTM>,
    dropout: Dropout,
    heads: OutputHeads,
}

impl SequenceModel {
    pub fn new(spec: ModelSpec, codec: TargetCodec, device: &Device, rng: &mut StdRng) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let embedding = linear(spec.input_dim, spec.emb_size, vb.pp("emb"))?;
        let emb_norm = if spec.emb_norm {
            Some(layer_norm(spec.emb_size, LAYER_NORM_EPS, vb.pp("emb_norm"))?)
        } else {
            None
        };

        let mut lstms = Vec::with_capacity(spec.rnn_layers);
        for layer in 0..spec.rnn_layers {
            let in_dim = if layer == 0 { spec.emb_size } else { spec.rnn_size };
            lstms.push(lstm(
                in_dim,
                spec.rnn_size,
                LSTMConfig::default(),
                vb.pp(format!("lstm{layer}")),
            )?);
        }

        let heads = if spec.mulout {
            OutputHeads::per_speaker(spec.speakers.indices(), spec.rnn_size, spec.output_width(), vb.clone())?
        } else {
            OutputHeads::shared(spec.rnn_size, spec.output_width(), vb.clone())?
        };

        seeded_init(&varmap, &spec, rng)?;

        tracing::info!(
            kind = spec.kind.as_str(),
            inputs = spec.input_dim,
            outputs = spec.output_width(),
            rnn_size = spec.rnn_size,
            rnn_layers = spec.rnn_layers,
            heads = heads.len(),
            "Built sequence model"
        );

        Ok(Self {
            dropout: Dropout::new(spec.dropout),
            spec,
            codec,
            device: device.clone(),
            varmap,
            embedding,
            emb_norm,
            lstms,
            heads,
        })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn codec(&self) -> &TargetCodec {
        &self.codec
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Trainable parameters
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn zero_state(&self, batch: usize) -> Result<RecurrentState> {
        RecurrentState::zeros(self.spec.rnn_layers, batch, self.spec.rnn_size, &self.device)
    }

    /// Forward a collated batch
    ///
    /// Rows flagged in `batch.resets` start from a zero state; `None` starts
    /// every row from zero. Returns `(B, T, output_width)` and the new state.
    pub fn forward(&self, batch: &Batch, state: Option<RecurrentState>, train: bool) -> Result<(Tensor, RecurrentState)> {
        if batch.feature_dim != self.spec.input_dim {
            return Err(DataError::dimension("model inputs", self.spec.input_dim, batch.feature_dim).into());
        }
        let x = batch.features_tensor(&self.device)?;
        self.forward_tensor(&x, &batch.lengths, &batch.speakers, &batch.resets, state, train)
    }

    pub fn forward_tensor(
        &self,
        x: &Tensor,
        lengths: &[usize],
        speakers: &[usize],
        resets: &[bool],
        state: Option<RecurrentState>,
        train: bool,
    ) -> Result<(Tensor, RecurrentState)> {
        let (batch, steps, _) = x.dims3()?;

        let active: Vec<usize> = speakers
            .iter()
            .zip(lengths)
            .filter(|(_, len)| **len > 0)
            .map(|(s, _)| *s)
            .collect();
        let head = self.heads.select(if active.is_empty() { speakers } else { &active })?;

        let state = match state {
            Some(state) => {
                if state.batch_size() != batch {
                    return Err(crate::error::ModelError::StateShape {
                        state: state.batch_size(),
                        batch,
                    });
                }
                state.reset_rows(resets)?
            }
            None => self.zero_state(batch)?,
        };

        if steps == 0 {
            let out = Tensor::zeros((batch, 0, self.spec.output_width()), DType::F32, &self.device)?;
            return Ok((out, state));
        }

        let mut h = self.embedding.forward(x)?;
        h = match self.spec.emb_activation {
            EmbActivation::Tanh => h.tanh()?,
            EmbActivation::Relu => h.relu()?,
            EmbActivation::Identity => h,
        };
        if let Some(norm) = &self.emb_norm {
            h = norm.forward(&h)?;
        }
        h = self.dropout.forward(&h, train)?;

        let mask: Vec<f32> = (0..batch)
            .flat_map(|b| (0..steps).map(move |t| if t < lengths[b] { 1.0 } else { 0.0 }))
            .collect();
        let mask = Tensor::from_vec(mask, (batch, steps), &self.device)?;

        let mut carried = Vec::with_capacity(self.lstms.len());
        for (layer, cell) in self.lstms.iter().enumerate() {
            let mut s = state.layer(layer).clone();
            let mut outputs = Vec::with_capacity(steps);
            for t in 0..steps {
                let xt = h.i((.., t, ..))?.contiguous()?;
                let next = cell.step(&xt, &s)?;
                let m = mask.i((.., t..t + 1))?;
                let h_t = m.broadcast_mul(&next.h().sub(s.h())?)?.add(s.h())?;
                let c_t = m.broadcast_mul(&next.c().sub(s.c())?)?.add(s.c())?;
                s = LSTMState::new(h_t, c_t);
                outputs.push(s.h().clone());
            }
            h = Tensor::stack(&outputs, 1)?;
            carried.push(s);
        }

        h = self.dropout.forward(&h, train)?;
        let out = head.forward(&h)?;
        let out = self.activate(&out)?;
        Ok((out, RecurrentState::from_layers(carried)))
    }

    fn activate(&self, out: &Tensor) -> Result<Tensor> {
        Ok(match self.spec.output_activation {
            OutputActivation::Linear => out.clone(),
            OutputActivation::Sigmoid => candle_nn::ops::sigmoid(out)?,
            OutputActivation::LogSoftmax => {
                let (b, t, w) = out.dims3()?;
                let q = self.spec.q_classes.unwrap_or(w);
                let grouped = out.reshape((b, t, w / q, q))?;
                candle_nn::ops::log_softmax(&grouped, D::Minus1)?.reshape((b, t, w))?
            }
        })
    }

    /// `(B, T, D)` point predictions in codec space (argmax class when quantized)
    pub fn point_estimates(&self, output: &Tensor) -> Result<Tensor> {
        match self.spec.q_classes {
            Some(q) => {
                let (b, t, w) = output.dims3()?;
                Ok(output
                    .reshape((b, t, w / q, q))?
                    .argmax(D::Minus1)?
                    .to_dtype(DType::F32)?)
            }
            None => Ok(output.clone()),
        }
    }

    /// Unpadded, de-normalized predictions per batch row (`len * D` values each)
    pub fn decode(&self, batch: &Batch, output: &Tensor) -> Result<Vec<Vec<f32>>> {
        let points = self.point_estimates(output)?.to_dtype(DType::F32)?;
        let rows: Vec<Vec<Vec<f32>>> = points.to_vec3()?;
        let mut decoded = Vec::with_capacity(rows.len());
        for (b, row) in rows.into_iter().enumerate() {
            let mut values: Vec<f32> = row.into_iter().take(batch.lengths[b]).flatten().collect();
            self.codec.decode_rows(batch.speakers[b], &mut values)?;
            decoded.push(values);
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptts_core::SpeakerIndexMap;
    use ptts_data::TargetKind;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn spec(q_classes: Option<usize>, mulout: bool) -> ModelSpec {
        ModelSpec {
            kind: TargetKind::Duration,
            input_dim: 3,
            target_dim: 2,
            emb_size: 4,
            rnn_size: 5,
            rnn_layers: 2,
            dropout: 0.0,
            emb_activation: EmbActivation::Tanh,
            emb_norm: true,
            output_activation: if q_classes.is_some() {
                OutputActivation::LogSoftmax
            } else {
                OutputActivation::Linear
            },
            q_classes,
            mulout,
            speakers: SpeakerIndexMap::from_pairs(vec![("a".to_string(), 0), ("b".to_string(), 2)]).unwrap(),
            input_stats: BTreeMap::new(),
        }
    }

    fn model(q_classes: Option<usize>, mulout: bool, seed: u64) -> SequenceModel {
        SequenceModel::new(
            spec(q_classes, mulout),
            TargetCodec::identity(2),
            &Device::Cpu,
            &mut StdRng::seed_from_u64(seed),
        )
        .unwrap()
    }

    fn input(batch: usize, steps: usize) -> Tensor {
        let values: Vec<f32> = (0..batch * steps * 3).map(|v| (v as f32 * 0.37).sin()).collect();
        Tensor::from_vec(values, (batch, steps, 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let m = model(None, false, 1);
        let (out, state) = m
            .forward_tensor(&input(2, 6), &[6, 4], &[0, 0], &[true, true], None, false)
            .unwrap();
        assert_eq!(out.dims(), &[2, 6, 2]);
        assert_eq!(state.num_layers(), 2);
        assert_eq!(state.batch_size(), 2);
    }

    #[test]
    fn test_log_softmax_groups_normalize() {
        let m = model(Some(4), false, 1);
        let (out, _) = m
            .forward_tensor(&input(1, 3), &[3], &[0], &[true], None, false)
            .unwrap();
        assert_eq!(out.dims(), &[1, 3, 8]);
        let probs = out.reshape((1, 3, 2, 4)).unwrap().exp().unwrap().sum(3).unwrap();
        for p in probs.flatten_all().unwrap().to_vec1::<f32>().unwrap() {
            assert!((p - 1.0).abs() < 1e-5);
        }
        let points = m.point_estimates(&out).unwrap();
        assert_eq!(points.dims(), &[1, 3, 2]);
    }

    #[test]
    fn test_seeded_init_reproducible() {
        let x = input(1, 4);
        let a = model(None, false, 7)
            .forward_tensor(&x, &[4], &[0], &[true], None, false)
            .unwrap()
            .0;
        let b = model(None, false, 7)
            .forward_tensor(&x, &[4], &[0], &[true], None, false)
            .unwrap()
            .0;
        let diff = (a - b).unwrap().abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_padded_steps_do_not_move_state() {
        let m = model(None, false, 3);
        let x = input(1, 5);
        let (_, full) = m.forward_tensor(&x, &[3], &[0], &[true], None, false).unwrap();
        let (_, short) = m
            .forward_tensor(&x.narrow(1, 0, 3).unwrap(), &[3], &[0], &[true], None, false)
            .unwrap();
        let diff = (full.layer(1).h() - short.layer(1).h())
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-6);
    }
}
