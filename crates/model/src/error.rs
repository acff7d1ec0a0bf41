use ptts_core::{ConfigError, DataError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("mulout batch mixes speakers {0:?}")]
    MixedSpeakers(Vec<usize>),

    #[error("no output head for speaker index {0}")]
    UnknownSpeakerHead(usize),

    #[error("recurrent state has batch size {state}, batch has {batch}")]
    StateShape { state: usize, batch: usize },

    #[error("parameter store lock poisoned")]
    Poisoned,

    #[error("checkpoint {path}: {reason}")]
    Checkpoint { path: String, reason: String },
}

impl ModelError {
    pub fn checkpoint(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Checkpoint {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
