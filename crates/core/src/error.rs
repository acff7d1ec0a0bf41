//! Error taxonomy shared by every crate
//!
//! Two families are fatal and raised at the layer that detects them:
//! - [`ConfigError`]: invalid option values or combinations, found before any
//!   expensive work starts
//! - [`DataError`]: inconsistent or malformed input data (missing statistics,
//!   dimensionality mismatches, unreadable label files)

use thiserror::Error;

/// Invalid configuration, reported with the offending value
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("unrecognized {kind} name: {value}")]
    Unrecognized { kind: &'static str, value: String },

    #[error("loss `{loss}` is incompatible with output activation `{activation}`")]
    LossActivationMismatch { loss: String, activation: String },

    #[error("{0} must be set in synthesis mode")]
    MissingModelPath(&'static str),

    #[error("quantization into {q_classes} classes requires speaker statistics")]
    QuantizationWithoutStats { q_classes: usize },

    #[error("no usable speakers left in the {split} split after {reason}")]
    NoSpeakers { split: String, reason: String },

    #[error("evaluation target `{0}` is not produced by the evaluator")]
    UnknownEvalTarget(String),

    #[error("duplicate speaker index {index} for `{first}` and `{second}`")]
    DuplicateSpeakerIndex {
        index: usize,
        first: String,
        second: String,
    },

    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unrecognized(kind: &'static str, value: impl Into<String>) -> Self {
        Self::Unrecognized {
            kind,
            value: value.into(),
        }
    }
}

/// Inconsistent input data
#[derive(Debug, Error)]
pub enum DataError {
    #[error("speaker `{0}` has no statistics entry")]
    MissingStats(String),

    #[error("speaker `{0}` is not present in the speaker config")]
    UnknownSpeaker(String),

    #[error("speaker index {0} is not present in the speaker map")]
    UnknownSpeakerIndex(usize),

    #[error("{what}: expected dimension {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("feature `{feature}` has no category `{value}`")]
    UnknownCategory { feature: String, value: String },

    #[error("feature `{0}` is missing from the label unit")]
    MissingFeature(String),

    #[error("feature `{feature}` expects a {expected} value")]
    FeatureKind {
        feature: String,
        expected: &'static str,
    },

    #[error("malformed file {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("utterance `{0}` is empty")]
    EmptyUtterance(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DataError {
    pub fn dimension(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    pub fn malformed(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_reports_value() {
        let err = ConfigError::unrecognized("loss", "hinge");
        assert_eq!(err.to_string(), "unrecognized loss name: hinge");
    }

    #[test]
    fn test_dimension_error_message() {
        let err = DataError::dimension("codebook width", 120, 118);
        assert!(err.to_string().contains("expected dimension 120, got 118"));
    }
}
