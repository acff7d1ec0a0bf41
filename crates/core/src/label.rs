//! Raw linguistic labels and acoustic frames as produced by feature extraction

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::DataError;

/// A single linguistic feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    /// Continuous value, passed through by the codebook
    Real(f32),
    /// Categorical value, one-hot encoded by the codebook
    Category(String),
}

impl LabelValue {
    pub fn category(value: impl Into<String>) -> Self {
        Self::Category(value.into())
    }
}

/// One linguistic unit (typically a phone) of a label sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelUnit {
    /// Named linguistic features
    pub features: BTreeMap<String, LabelValue>,
    /// Boolean factor bits appended after the codebook features
    #[serde(default)]
    pub factors: Vec<bool>,
    /// Unit duration in seconds (ground truth for training, optional hint at synthesis)
    #[serde(default)]
    pub duration: f32,
    /// Whether the unit is a silence/pause
    #[serde(default)]
    pub silence: bool,
}

/// A label file: the unit sequence of one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSequence {
    /// Speaker id, when the label file carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub units: Vec<LabelUnit>,
}

impl LabelSequence {
    /// Load a JSON label file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| DataError::malformed(path.display(), e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn durations(&self) -> Vec<f32> {
        self.units.iter().map(|u| u.duration).collect()
    }
}

/// Acoustic frames of one utterance, one row per frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcousticFrames {
    pub frames: Vec<Vec<f32>>,
}

impl AcousticFrames {
    /// Load a JSON acoustic file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| DataError::malformed(path.display(), e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Check every frame has `width` values
    pub fn check_width(&self, width: usize) -> Result<(), DataError> {
        match self.frames.iter().find(|f| f.len() != width) {
            Some(frame) => Err(DataError::dimension("acoustic frame", width, frame.len())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_value_untagged() {
        let unit: LabelUnit = serde_json::from_str(
            r#"{"features": {"phone": "a", "pos": 0.5}, "factors": [true, false], "duration": 0.08}"#,
        )
        .unwrap();
        assert_eq!(unit.features["phone"], LabelValue::category("a"));
        assert_eq!(unit.features["pos"], LabelValue::Real(0.5));
        assert!(!unit.silence);
    }

    #[test]
    fn test_acoustic_width_check() {
        let frames = AcousticFrames {
            frames: vec![vec![0.0; 4], vec![0.0; 3]],
        };
        assert!(frames.check_width(4).is_err());
    }
}
