use ptts_core::{ConfigError, DataError};
use thiserror::Error;

/// Failures while building datasets or batches
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("failed to start parser pool: {0}")]
    Pool(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
