//! Recurrent sequence models for duration and acoustic prediction
//!
//! Built on candle:
//! - `candle-nn` LSTM cells, linear layers and layer norm
//! - explicit [`RecurrentState`] carried across chunks
//! - shared or per-speaker output heads ([`OutputHeads`])
//! - single-file safetensors checkpoints carrying spec, codec and training info

pub mod checkpoint;
pub mod error;
pub mod heads;
pub mod init;
pub mod model;
pub mod spec;
pub mod state;

pub use checkpoint::CheckpointInfo;
pub use error::{ModelError, Result};
pub use heads::OutputHeads;
pub use model::SequenceModel;
pub use spec::ModelSpec;
pub use state::RecurrentState;

/// Pick the compute device
pub fn select_device(cuda: bool) -> Result<candle_core::Device> {
    if cuda {
        let device = candle_core::Device::new_cuda(0)?;
        tracing::info!("Using CUDA device 0");
        Ok(device)
    } else {
        Ok(candle_core::Device::Cpu)
    }
}
