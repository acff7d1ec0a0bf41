//! Target codec: per-speaker normalization and quantization
//!
//! A codec is built once per dataset and travels inside model checkpoints so
//! that predictions can be mapped back to physical units without the training
//! configuration.

use ptts_config::Normalization;
use ptts_core::{ConfigError, DataError, SpeakerIndexMap, StreamStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How targets are represented to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CodecMode {
    Identity,
    ZScore,
    MinMax,
    /// Uniform bins over the speaker's `[min, max]`; targets are bin indices
    Quantized { classes: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCodec {
    pub mode: CodecMode,
    pub width: usize,
    /// Statistics keyed by speaker index
    pub stats: BTreeMap<usize, StreamStats>,
}

impl TargetCodec {
    /// Build a codec, rejecting quantization without any statistics
    pub fn new(
        normalization: Normalization,
        q_classes: Option<usize>,
        stats: BTreeMap<usize, StreamStats>,
        width: usize,
    ) -> Result<Self, ConfigError> {
        let mode = match (q_classes, normalization) {
            (Some(classes), _) => {
                if stats.is_empty() {
                    return Err(ConfigError::QuantizationWithoutStats { q_classes: classes });
                }
                CodecMode::Quantized { classes }
            }
            (None, Normalization::None) => CodecMode::Identity,
            (None, Normalization::ZScore) => CodecMode::ZScore,
            (None, Normalization::MinMax) => CodecMode::MinMax,
        };
        Ok(Self { mode, width, stats })
    }

    pub fn identity(width: usize) -> Self {
        Self {
            mode: CodecMode::Identity,
            width,
            stats: BTreeMap::new(),
        }
    }

    pub fn classes(&self) -> Option<usize> {
        match self.mode {
            CodecMode::Quantized { classes } => Some(classes),
            _ => None,
        }
    }

    pub fn needs_stats(&self) -> bool {
        self.mode != CodecMode::Identity
    }

    /// Fail unless every listed speaker has statistics of the right width
    pub fn require(&self, speakers: &SpeakerIndexMap) -> Result<(), DataError> {
        if !self.needs_stats() {
            return Ok(());
        }
        for (id, idx) in speakers.pairs() {
            let stats = self
                .stats
                .get(&idx)
                .ok_or_else(|| DataError::MissingStats(id.to_string()))?;
            stats.check_width(&format!("speaker {id} statistics"), self.width)?;
        }
        Ok(())
    }

    fn stats(&self, speaker: usize) -> Result<&StreamStats, DataError> {
        self.stats
            .get(&speaker)
            .ok_or_else(|| DataError::MissingStats(speaker.to_string()))
    }

    /// Encode one target row in place
    pub fn encode_row(&self, speaker: usize, row: &mut [f32]) -> Result<(), DataError> {
        if self.mode == CodecMode::Identity {
            return Ok(());
        }
        let stats = self.stats(speaker)?;
        for (d, x) in row.iter_mut().enumerate() {
            *x = match self.mode {
                CodecMode::Identity => *x,
                CodecMode::ZScore => (*x - stats.mean[d]) / stats.safe_std(d),
                CodecMode::MinMax => (*x - stats.min[d]) / stats.range(d),
                CodecMode::Quantized { classes } => quantize(*x, stats.min[d], stats.range(d), classes) as f32,
            };
        }
        Ok(())
    }

    /// Decode one target row in place (bin index -> bin center when quantized)
    pub fn decode_row(&self, speaker: usize, row: &mut [f32]) -> Result<(), DataError> {
        if self.mode == CodecMode::Identity {
            return Ok(());
        }
        let stats = self.stats(speaker)?;
        for (d, x) in row.iter_mut().enumerate() {
            *x = match self.mode {
                CodecMode::Identity => *x,
                CodecMode::ZScore => *x * stats.safe_std(d) + stats.mean[d],
                CodecMode::MinMax => *x * stats.range(d) + stats.min[d],
                CodecMode::Quantized { classes } => {
                    bin_center(x.round().max(0.0) as usize, stats.min[d], stats.range(d), classes)
                }
            };
        }
        Ok(())
    }

    /// Decode a row-major buffer of rows
    pub fn decode_rows(&self, speaker: usize, data: &mut [f32]) -> Result<(), DataError> {
        for row in data.chunks_mut(self.width) {
            self.decode_row(speaker, row)?;
        }
        Ok(())
    }

    /// Width of one bin of dimension `d` for `speaker`
    pub fn bin_width(&self, speaker: usize, d: usize) -> Option<f32> {
        let classes = self.classes()?;
        let stats = self.stats.get(&speaker)?;
        Some(stats.range(d) / classes as f32)
    }
}

fn quantize(x: f32, min: f32, range: f32, classes: usize) -> usize {
    let bin = ((x - min) / range * classes as f32).floor();
    (bin.max(0.0) as usize).min(classes - 1)
}

fn bin_center(bin: usize, min: f32, range: f32, classes: usize) -> f32 {
    let bin = bin.min(classes - 1);
    min + (bin as f32 + 0.5) * range / classes as f32
}
