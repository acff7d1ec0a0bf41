//! Batch collation
//!
//! Samples are zero-padded to the longest sequence of the batch. Padding
//! never reaches the loss: every consumer masks with [`Batch::mask`].

use candle_core::{Device, Tensor};
use ptts_core::Sample;

use crate::dataset::SequenceDataset;

/// A padded batch, row-major host buffers
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub feature_dim: usize,
    pub target_dim: usize,
    /// Padded length `T`
    pub max_len: usize,
    /// `(B, T, F)`
    pub features: Vec<f32>,
    /// `(B, T, D)`
    pub targets: Vec<f32>,
    pub lengths: Vec<usize>,
    pub speakers: Vec<usize>,
    /// Row starts a new utterance (or is idle): recurrent state must be zeroed
    pub resets: Vec<bool>,
    pub silence: Vec<Vec<bool>>,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.lengths.len()
    }

    /// Total number of real (unpadded) steps
    pub fn steps(&self) -> usize {
        self.lengths.iter().sum()
    }

    /// `(B, T)` mask, 1.0 on real steps
    pub fn mask(&self) -> Vec<f32> {
        let mut mask = vec![0.0; self.size() * self.max_len];
        for (b, &len) in self.lengths.iter().enumerate() {
            mask[b * self.max_len..b * self.max_len + len].fill(1.0);
        }
        mask
    }

    /// `(B, T)` mask of real, non-silent steps
    pub fn voiced_mask(&self) -> Vec<f32> {
        let mut mask = vec![0.0; self.size() * self.max_len];
        for (b, silence) in self.silence.iter().enumerate() {
            for (t, &sil) in silence.iter().enumerate() {
                if !sil {
                    mask[b * self.max_len + t] = 1.0;
                }
            }
        }
        mask
    }

    /// The one speaker of every non-idle row, if they agree
    pub fn single_speaker(&self) -> Option<usize> {
        let mut active = self
            .speakers
            .iter()
            .zip(&self.lengths)
            .filter(|(_, len)| **len > 0)
            .map(|(&s, _)| s);
        let first = active.next()?;
        active.all(|s| s == first).then_some(first)
    }

    /// Unpadded features of row `b`
    pub fn row_features(&self, b: usize) -> &[f32] {
        let start = b * self.max_len * self.feature_dim;
        &self.features[start..start + self.lengths[b] * self.feature_dim]
    }

    /// Unpadded targets of row `b`
    pub fn row_targets(&self, b: usize) -> &[f32] {
        let start = b * self.max_len * self.target_dim;
        &self.targets[start..start + self.lengths[b] * self.target_dim]
    }

    pub fn features_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.features, (self.size(), self.max_len, self.feature_dim), device)
    }

    pub fn targets_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.targets, (self.size(), self.max_len, self.target_dim), device)
    }

    pub fn mask_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_vec(self.mask(), (self.size(), self.max_len), device)
    }

    pub fn voiced_mask_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_vec(self.voiced_mask(), (self.size(), self.max_len), device)
    }
}

/// Pad and stack samples; `None` slots become zero-length reset rows
///
/// Idle rows take the speaker of the first real row so that single-speaker
/// batches stay single-speaker.
pub fn collate(samples: &[Option<&Sample>], feature_dim: usize, target_dim: usize) -> Batch {
    let max_len = samples.iter().flatten().map(|s| s.len()).max().unwrap_or(0);
    let fill_speaker = samples.iter().flatten().map(|s| s.speaker).next().unwrap_or(0);
    let rows = samples.len();

    let mut batch = Batch {
        feature_dim,
        target_dim,
        max_len,
        features: vec![0.0; rows * max_len * feature_dim],
        targets: vec![0.0; rows * max_len * target_dim],
        lengths: Vec::with_capacity(rows),
        speakers: Vec::with_capacity(rows),
        resets: Vec::with_capacity(rows),
        silence: Vec::with_capacity(rows),
    };

    for (b, slot) in samples.iter().enumerate() {
        match slot {
            Some(sample) => {
                let f0 = b * max_len * feature_dim;
                batch.features[f0..f0 + sample.features.len()].copy_from_slice(&sample.features);
                let t0 = b * max_len * target_dim;
                batch.targets[t0..t0 + sample.targets.len()].copy_from_slice(&sample.targets);
                batch.lengths.push(sample.len());
                batch.speakers.push(sample.speaker);
                batch.resets.push(sample.starts_utterance());
                batch.silence.push(sample.silence.clone());
            }
            None => {
                batch.lengths.push(0);
                batch.speakers.push(fill_speaker);
                batch.resets.push(true);
                batch.silence.push(Vec::new());
            }
        }
    }
    batch
}

/// Collate the given slots of a dataset
pub fn collate_indices(dataset: &SequenceDataset, slots: &[Option<usize>]) -> Batch {
    let samples: Vec<Option<&Sample>> = slots.iter().map(|s| s.map(|i| dataset.sample(i))).collect();
    collate(&samples, dataset.feature_dim(), dataset.target_dim())
}
