//! Synthesis pipeline
//!
//! Turns one label file into acoustic parameters using a trained duration
//! checkpoint and a trained acoustic checkpoint:
//! - [`Synthesizer`]: loads and cross-checks both models against the codebook
//! - [`SynthesisOutput`]: JSON document and raw f32 stream files

pub mod error;
pub mod output;
pub mod synthesis;

pub use error::{Result, SynthesisError};
pub use output::SynthesisOutput;
pub use synthesis::{SynthesisOptions, Synthesizer};
