//! Feature codebook
//!
//! Maps a linguistic label unit to a fixed-length numeric vector:
//! - continuous features pass through unchanged (width 1)
//! - categorical features become one-hot vectors sized to their cardinality
//! - [`BOOLEAN_FACTORS`] factor bits are appended last
//!
//! Features are encoded in sorted name order, so the layout depends only on
//! the codebook file.

use ptts_config::constants::features::BOOLEAN_FACTORS;
use ptts_core::{DataError, LabelSequence, LabelUnit, LabelValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

fn unit_std() -> f32 {
    1.0
}

/// Encoding of one named feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureCode {
    /// Marked by its `mean`; the statistics are descriptive only
    Continuous {
        mean: f32,
        #[serde(default = "unit_std")]
        std: f32,
    },
    /// Category values in one-hot order
    Categorical(Vec<String>),
}

impl FeatureCode {
    pub fn width(&self) -> usize {
        match self {
            Self::Continuous { .. } => 1,
            Self::Categorical(values) => values.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Codebook {
    features: BTreeMap<String, FeatureCode>,
}

impl Codebook {
    pub fn new(features: BTreeMap<String, FeatureCode>) -> Self {
        Self { features }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let codebook: Self =
            serde_json::from_str(&content).map_err(|e| DataError::malformed(path.display(), e.to_string()))?;
        tracing::info!(
            path = %path.display(),
            features = codebook.features.len(),
            width = codebook.width(),
            "Loaded codebook"
        );
        Ok(codebook)
    }

    /// Encoded width, factor bits included
    pub fn width(&self) -> usize {
        self.features.values().map(FeatureCode::width).sum::<usize>() + BOOLEAN_FACTORS
    }

    /// Fail when a model was built for a different width
    pub fn check_width(&self, what: &str, expected: usize) -> Result<(), DataError> {
        if self.width() != expected {
            return Err(DataError::dimension(what, expected, self.width()));
        }
        Ok(())
    }

    /// Append the encoding of `unit` to `out`
    pub fn encode_into(&self, unit: &LabelUnit, out: &mut Vec<f32>) -> Result<(), DataError> {
        for (name, code) in &self.features {
            let value = unit
                .features
                .get(name)
                .ok_or_else(|| DataError::MissingFeature(name.clone()))?;

            match (code, value) {
                (FeatureCode::Continuous { .. }, LabelValue::Real(x)) => out.push(*x),
                (FeatureCode::Categorical(values), LabelValue::Category(v)) => {
                    let hot = values.iter().position(|c| c == v).ok_or_else(|| DataError::UnknownCategory {
                        feature: name.clone(),
                        value: v.clone(),
                    })?;
                    out.extend((0..values.len()).map(|i| if i == hot { 1.0 } else { 0.0 }));
                }
                (FeatureCode::Continuous { .. }, LabelValue::Category(_)) => {
                    return Err(DataError::FeatureKind {
                        feature: name.clone(),
                        expected: "continuous",
                    });
                }
                (FeatureCode::Categorical(_), LabelValue::Real(_)) => {
                    return Err(DataError::FeatureKind {
                        feature: name.clone(),
                        expected: "categorical",
                    });
                }
            }
        }

        if unit.factors.len() != BOOLEAN_FACTORS {
            return Err(DataError::dimension("boolean factors", BOOLEAN_FACTORS, unit.factors.len()));
        }
        out.extend(unit.factors.iter().map(|&b| if b { 1.0 } else { 0.0 }));
        Ok(())
    }

    pub fn encode_unit(&self, unit: &LabelUnit) -> Result<Vec<f32>, DataError> {
        let mut out = Vec::with_capacity(self.width());
        self.encode_into(unit, &mut out)?;
        Ok(out)
    }

    /// Row-major encoding of every unit of a sequence
    pub fn encode(&self, labels: &LabelSequence) -> Result<Vec<f32>, DataError> {
        let mut out = Vec::with_capacity(self.width() * labels.len());
        for unit in &labels.units {
            self.encode_into(unit, &mut out)?;
        }
        Ok(out)
    }
}
