use ptts_core::{ConfigError, DataError};
use ptts_data::TargetKind;
use ptts_model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("{path} holds a {found} model, expected {expected}")]
    WrongKind {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("no synthesis speaker: pass one explicitly or set `speaker` in the label file")]
    NoSpeaker,

    #[error("speaker `{speaker}` has index {duration} in the duration model but {acoustic} in the acoustic model")]
    SpeakerMismatch {
        speaker: String,
        duration: usize,
        acoustic: usize,
    },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SynthesisError {
    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn wrong_kind(path: impl std::fmt::Display, expected: TargetKind, found: TargetKind) -> Self {
        Self::WrongKind {
            path: path.to_string(),
            expected: expected.as_str(),
            found: found.as_str(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SynthesisError>;
