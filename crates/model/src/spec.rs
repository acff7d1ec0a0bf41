//! Model description stored with every checkpoint

use ptts_config::{EmbActivation, ModelConfig, OutputActivation};
use ptts_core::{AcousticLayout, SpeakerIndexMap, StreamStats};
use ptts_data::{SequenceDataset, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything needed to rebuild a model without the training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub kind: TargetKind,
    pub input_dim: usize,
    /// Target width `D`
    pub target_dim: usize,
    pub emb_size: usize,
    pub rnn_size: usize,
    pub rnn_layers: usize,
    pub dropout: f32,
    pub emb_activation: EmbActivation,
    pub emb_norm: bool,
    pub output_activation: OutputActivation,
    pub q_classes: Option<usize>,
    pub mulout: bool,
    /// Speakers the model was trained for (one head each when mulout)
    pub speakers: SpeakerIndexMap,
    /// Duration statistics used to normalize acoustic inputs
    #[serde(default)]
    pub input_stats: BTreeMap<usize, StreamStats>,
}

impl ModelSpec {
    /// Describe a model for `dataset` under `config`
    pub fn for_dataset(config: &ModelConfig, dataset: &SequenceDataset) -> Self {
        Self {
            kind: dataset.kind(),
            input_dim: dataset.feature_dim(),
            target_dim: dataset.target_dim(),
            emb_size: config.network.emb_size,
            rnn_size: config.network.rnn_size,
            rnn_layers: config.network.rnn_layers,
            dropout: config.network.dropout,
            emb_activation: config.network.emb_activation,
            emb_norm: config.network.emb_norm,
            output_activation: config.output_activation(),
            q_classes: config.q_classes,
            mulout: config.mulout,
            speakers: dataset.speakers().clone(),
            input_stats: dataset.input_stats().clone(),
        }
    }

    /// Width of the output projection (`D * Q` when quantized)
    pub fn output_width(&self) -> usize {
        self.target_dim * self.q_classes.unwrap_or(1)
    }

    /// Acoustic layout implied by the declared target width
    pub fn acoustic_layout(&self) -> Result<AcousticLayout, ptts_core::DataError> {
        AcousticLayout::from_width(self.target_dim)
    }
}
