//! Core types and traits for parametric TTS training and synthesis
//!
//! Shared by every crate in the workspace:
//! - speaker index map and per-speaker statistics
//! - raw label / acoustic frame types
//! - encoded samples and data splits
//! - the acoustic stream layout
//! - the error taxonomy
//! - collaborator traits (`FeatureSource`, `MetricsSink`)

pub mod acoustic;
pub mod error;
pub mod label;
pub mod sample;
pub mod speaker;
pub mod traits;

pub use acoustic::AcousticLayout;
pub use error::{ConfigError, DataError};
pub use label::{AcousticFrames, LabelSequence, LabelUnit, LabelValue};
pub use sample::{ChunkPos, Sample, Split};
pub use speaker::{SpeakerConfig, SpeakerEntry, SpeakerIndexMap, StreamStats};
pub use traits::{FeatureSource, MemorySink, MetricsSink, NullSink};
