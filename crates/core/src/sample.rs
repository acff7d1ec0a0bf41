//! Encoded utterance samples

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data split selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a chunk within its utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPos {
    pub index: usize,
    pub count: usize,
}

impl Default for ChunkPos {
    fn default() -> Self {
        Self { index: 0, count: 1 }
    }
}

/// One encoded sequence: features, targets, speaker and true length
///
/// Features and targets are stored row-major, `len()` rows each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub utterance: String,
    pub speaker: usize,
    pub feature_dim: usize,
    pub features: Vec<f32>,
    pub target_dim: usize,
    pub targets: Vec<f32>,
    /// Per-step silence flags
    pub silence: Vec<bool>,
    #[serde(default)]
    pub chunk: ChunkPos,
}

impl Sample {
    /// True (unpadded) length in steps
    pub fn len(&self) -> usize {
        self.silence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.silence.is_empty()
    }

    /// First chunk of its utterance (recurrent state must be reset)
    pub fn starts_utterance(&self) -> bool {
        self.chunk.index == 0
    }

    pub fn feature_row(&self, t: usize) -> &[f32] {
        &self.features[t * self.feature_dim..(t + 1) * self.feature_dim]
    }

    pub fn target_row(&self, t: usize) -> &[f32] {
        &self.targets[t * self.target_dim..(t + 1) * self.target_dim]
    }

    /// Copy of steps `start..start + len` tagged with `chunk`
    pub fn slice(&self, start: usize, len: usize, chunk: ChunkPos) -> Self {
        let end = (start + len).min(self.len());
        Self {
            utterance: self.utterance.clone(),
            speaker: self.speaker,
            feature_dim: self.feature_dim,
            features: self.features[start * self.feature_dim..end * self.feature_dim].to_vec(),
            target_dim: self.target_dim,
            targets: self.targets[start * self.target_dim..end * self.target_dim].to_vec(),
            silence: self.silence[start..end].to_vec(),
            chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Sample {
        Sample {
            utterance: "u".into(),
            speaker: 0,
            feature_dim: 2,
            features: (0..len * 2).map(|v| v as f32).collect(),
            target_dim: 1,
            targets: (0..len).map(|v| v as f32).collect(),
            silence: vec![false; len],
            chunk: ChunkPos::default(),
        }
    }

    #[test]
    fn test_rows() {
        let s = sample(3);
        assert_eq!(s.len(), 3);
        assert_eq!(s.feature_row(1), &[2.0, 3.0]);
        assert_eq!(s.target_row(2), &[2.0]);
    }

    #[test]
    fn test_slice() {
        let s = sample(5);
        let c = s.slice(3, 4, ChunkPos { index: 1, count: 2 });
        assert_eq!(c.len(), 2);
        assert_eq!(c.targets, vec![3.0, 4.0]);
        assert!(!c.starts_utterance());
    }
}
