//! Configuration for parametric TTS training and synthesis
//!
//! One validated [`ModelConfig`] per model type, gathered in a [`RunConfig`]
//! together with data locations, loader settings and the synthesis request.

pub mod constants;
pub mod kinds;
pub mod settings;

pub use kinds::{EmbActivation, LossKind, Normalization, OptimizerKind, OutputActivation};
pub use settings::{
    DataPaths, ModelConfig, NetworkConfig, PlateauConfig, RunConfig, SynthesisConfig,
};
