//! Data layer for parametric TTS training
//!
//! Features:
//! - Feature codebook: linguistic labels to fixed-width vectors
//! - Duration and acoustic sequence datasets with an on-disk encoded cache
//! - Per-speaker target normalization and quantization
//! - Chunking and lane scheduling for stateful training
//! - Per-speaker batch sampling for multi-output models
//! - Padded batch collation and a threaded loader

pub mod chunk;
pub mod codebook;
pub mod codec;
pub mod collate;
pub mod dataset;
pub mod encode;
pub mod error;
pub mod loader;
pub mod sampler;
pub mod source;
pub mod stats;

pub use codebook::{Codebook, FeatureCode};
pub use codec::{CodecMode, TargetCodec};
pub use collate::{collate, collate_indices, Batch};
pub use dataset::{DatasetOptions, SequenceDataset, TargetKind};
pub use encode::{acoustic_inputs, frame_count};
pub use error::DatasetError;
pub use loader::{DataLoader, EpochBatches};
pub use sampler::{BatchPlan, BatchSampler, LaneSchedule};
pub use source::JsonFeatureSource;
pub use stats::{compute_stats, SpeakerSummary};
