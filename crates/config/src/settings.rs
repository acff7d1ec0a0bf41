//! Run configuration
//!
//! Layered loading:
//! 1. Built-in defaults
//! 2. Optional config file (TOML, YAML or JSON, chosen by extension)
//! 3. `PTTS__*` environment overrides (e.g. `PTTS__DURATION__LR=0.01`)
//!
//! Command-line overrides are applied by the binary afterwards, then
//! [`RunConfig::validate`] checks every cross-field constraint once.

use ptts_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{eval_targets, files, frames, plateau, training};
use crate::kinds::{EmbActivation, LossKind, Normalization, OptimizerKind, OutputActivation};

/// Data locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Speaker config file (JSON)
    pub cfg_spk: PathBuf,
    /// Label directory, one JSON file per utterance
    pub lab_dir: PathBuf,
    /// Acoustic directory, one JSON file per utterance
    pub aco_dir: PathBuf,
    /// Codebook file (JSON)
    pub codebooks: PathBuf,
    /// Output directory for checkpoints, manifest, events and synthesis
    pub save_path: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            cfg_spk: PathBuf::from("cfg/speakers.json"),
            lab_dir: PathBuf::from("data/lab"),
            aco_dir: PathBuf::from("data/aco"),
            codebooks: PathBuf::from("data/codebooks.json"),
            save_path: PathBuf::from("ckpt"),
        }
    }
}

/// Encoder / head sizes shared by both model types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub emb_size: usize,
    pub rnn_size: usize,
    pub rnn_layers: usize,
    pub dropout: f32,
    pub emb_activation: EmbActivation,
    /// Layer normalization after the embedding
    pub emb_norm: bool,
}

impl NetworkConfig {
    fn new(emb_size: usize, rnn_size: usize, rnn_layers: usize) -> Self {
        Self {
            emb_size,
            rnn_size,
            rnn_layers,
            dropout: training::DROPOUT,
            emb_activation: EmbActivation::Tanh,
            emb_norm: false,
        }
    }

    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        if self.emb_size == 0 {
            return Err(ConfigError::invalid(format!("{prefix}.emb_size"), "must be at least 1"));
        }
        if self.rnn_size == 0 {
            return Err(ConfigError::invalid(format!("{prefix}.rnn_size"), "must be at least 1"));
        }
        if self.rnn_layers == 0 {
            return Err(ConfigError::invalid(format!("{prefix}.rnn_layers"), "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::invalid(
                format!("{prefix}.dropout"),
                format!("{} is outside [0, 1)", self.dropout),
            ));
        }
        Ok(())
    }
}

/// Plateau learning-rate reduction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
}

impl PlateauConfig {
    pub fn new(patience: usize) -> Self {
        Self {
            factor: plateau::FACTOR,
            patience,
            min_lr: plateau::MIN_LR,
        }
    }
}

/// Configuration of one sequence model and its training
///
/// Both the duration and the acoustic model are described by this struct;
/// the acoustic-only fields are ignored for the duration model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub network: NetworkConfig,
    pub optim: OptimizerKind,
    pub lr: f64,
    pub loss: LossKind,
    /// Sigmoid-bounded regression output (min-max normalized targets)
    pub sigmoid: bool,
    /// One output head per speaker
    pub mulout: bool,
    /// Quantize targets into this many classes
    pub q_classes: Option<usize>,
    /// Chunk utterances to this length and train statefully
    pub max_seq_len: Option<usize>,
    /// Per-speaker sample cap
    pub max_samples: Option<usize>,
    /// Minimum samples a speaker needs to get its own head in mulout mode
    pub min_speaker_samples: usize,
    /// Z-score normalize targets (always on for the duration model)
    pub normalize: bool,
    /// Plateau schedule; enabled by default for SGD
    pub plateau: Option<PlateauConfig>,
    /// Metric used for early stopping
    pub eval_target: String,
    /// Acoustic only: cepstral order of the frame layout
    pub cepstral_order: usize,
    /// Acoustic only: cap on frames per training utterance
    pub train_forced_trim: Option<usize>,
    /// Acoustic only: cap on frames per validation utterance
    pub valid_forced_trim: Option<usize>,
}

impl ModelConfig {
    /// Defaults of the duration model
    pub fn duration() -> Self {
        Self {
            network: NetworkConfig::new(256, 256, 1),
            optim: OptimizerKind::RmsProp,
            lr: training::LEARNING_RATE,
            loss: LossKind::Mse,
            sigmoid: false,
            mulout: false,
            q_classes: None,
            max_seq_len: None,
            max_samples: None,
            min_speaker_samples: 1,
            normalize: true,
            plateau: None,
            eval_target: eval_targets::DURATION.to_string(),
            cepstral_order: frames::CEPSTRAL_ORDER,
            train_forced_trim: None,
            valid_forced_trim: None,
        }
    }

    /// Defaults of the acoustic model
    pub fn acoustic() -> Self {
        Self {
            network: NetworkConfig::new(256, 512, 2),
            optim: OptimizerKind::Adam,
            normalize: false,
            eval_target: eval_targets::ACOUSTIC.to_string(),
            ..Self::duration()
        }
    }

    /// Loss actually used: quantized targets always train with nll
    pub fn effective_loss(&self) -> LossKind {
        if self.q_classes.is_some() {
            LossKind::Nll
        } else {
            self.loss
        }
    }

    pub fn output_activation(&self) -> OutputActivation {
        if self.q_classes.is_some() {
            OutputActivation::LogSoftmax
        } else if self.sigmoid {
            OutputActivation::Sigmoid
        } else {
            OutputActivation::Linear
        }
    }

    /// Target normalization implied by the output activation
    pub fn normalization(&self) -> Normalization {
        if self.q_classes.is_some() {
            Normalization::None
        } else if self.sigmoid {
            Normalization::MinMax
        } else if self.normalize {
            Normalization::ZScore
        } else {
            Normalization::None
        }
    }

    pub fn stateful(&self) -> bool {
        self.max_seq_len.is_some()
    }

    /// Cross-field validation, run once before any data is loaded
    pub fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        self.network.validate(prefix)?;

        if !(self.lr > 0.0) {
            return Err(ConfigError::invalid(format!("{prefix}.lr"), format!("{} must be positive", self.lr)));
        }
        if let Some(q) = self.q_classes {
            if q < 2 {
                return Err(ConfigError::invalid(format!("{prefix}.q_classes"), format!("{q} < 2")));
            }
            if self.sigmoid {
                return Err(ConfigError::invalid(
                    format!("{prefix}.sigmoid"),
                    "sigmoid output cannot be combined with quantized targets",
                ));
            }
        }
        if self.max_seq_len == Some(0) {
            return Err(ConfigError::invalid(format!("{prefix}.max_seq_len"), "must be at least 1"));
        }
        if self.max_samples == Some(0) {
            return Err(ConfigError::invalid(format!("{prefix}.max_samples"), "must be at least 1"));
        }
        if self.cepstral_order == 0 {
            return Err(ConfigError::invalid(format!("{prefix}.cepstral_order"), "must be at least 1"));
        }
        if let Some(plateau) = &self.plateau {
            if !(plateau.factor > 0.0 && plateau.factor < 1.0) {
                return Err(ConfigError::invalid(
                    format!("{prefix}.plateau.factor"),
                    format!("{} is outside (0, 1)", plateau.factor),
                ));
            }
        }
        if self.eval_target.is_empty() {
            return Err(ConfigError::invalid(format!("{prefix}.eval_target"), "must not be empty"));
        }

        // nll follows from q_classes; an explicit nll without classes has no class count
        if self.q_classes.is_none() && self.loss == LossKind::Nll {
            return Err(ConfigError::invalid(format!("{prefix}.loss"), "nll requires q_classes"));
        }
        self.effective_loss().check(self.output_activation())
    }
}

/// Synthesis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Label file to synthesize
    pub lab: Option<PathBuf>,
    /// Trained duration checkpoint
    pub dur_model: Option<PathBuf>,
    /// Trained acoustic checkpoint
    pub aco_model: Option<PathBuf>,
    /// Use label durations instead of the duration model
    pub force_dur: bool,
    /// Post-filter factor applied to cepstral coefficients 1..
    pub pf: f32,
    /// Speaker id; defaults to the label file's speaker
    pub speaker: Option<String>,
    /// Also write raw little-endian f32 stream files
    pub write_streams: bool,
}

impl SynthesisConfig {
    pub fn enabled(&self) -> bool {
        self.lab.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled() {
            return Ok(());
        }
        if self.dur_model.is_none() {
            return Err(ConfigError::MissingModelPath("dur_model"));
        }
        if self.aco_model.is_none() {
            return Err(ConfigError::MissingModelPath("aco_model"));
        }
        if !(self.pf > 0.0) {
            return Err(ConfigError::invalid("synthesis.pf", format!("{} must be positive", self.pf)));
        }
        Ok(())
    }
}

/// Fully resolved configuration of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub data: DataPaths,
    pub train_dur: bool,
    pub train_aco: bool,
    pub batch_size: usize,
    pub epoch: usize,
    pub log_freq: usize,
    pub patience: usize,
    pub seed: u64,
    pub cuda: bool,
    /// Rebuild cached encoded datasets
    pub force_gen: bool,
    pub loader_workers: usize,
    pub parser_workers: usize,
    pub exclude_train_spks: Vec<String>,
    pub exclude_eval_spks: Vec<String>,
    pub duration: ModelConfig,
    pub acoustic: ModelConfig,
    pub synthesis: SynthesisConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data: DataPaths::default(),
            train_dur: false,
            train_aco: false,
            batch_size: training::BATCH_SIZE,
            epoch: training::EPOCHS,
            log_freq: training::LOG_FREQ,
            patience: training::PATIENCE,
            seed: training::SEED,
            cuda: false,
            force_gen: false,
            loader_workers: training::LOADER_WORKERS,
            parser_workers: training::PARSER_WORKERS,
            exclude_train_spks: Vec::new(),
            exclude_eval_spks: Vec::new(),
            duration: ModelConfig::duration(),
            acoustic: ModelConfig::acoustic(),
            synthesis: SynthesisConfig {
                pf: 1.0,
                ..Default::default()
            },
        }
    }
}

impl RunConfig {
    /// Load defaults, an optional file and `PTTS__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Self::default()).map_err(|e| ConfigError::Load(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PTTS")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Enable the plateau schedule for an SGD acoustic model where none was configured
    pub fn apply_schedule_defaults(&mut self) {
        let acoustic = &mut self.acoustic;
        if acoustic.plateau.is_none() && acoustic.optim == OptimizerKind::Sgd {
            acoustic.plateau = Some(PlateauConfig::new(self.patience));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.epoch == 0 {
            return Err(ConfigError::invalid("epoch", "must be at least 1"));
        }
        if self.log_freq == 0 {
            return Err(ConfigError::invalid("log_freq", "must be at least 1"));
        }
        if self.patience == 0 {
            return Err(ConfigError::invalid("patience", "must be at least 1"));
        }
        if self.parser_workers == 0 {
            return Err(ConfigError::invalid("parser_workers", "must be at least 1"));
        }
        if self.train_dur {
            self.duration.validate("duration")?;
        }
        if self.train_aco {
            self.acoustic.validate("acoustic")?;
        }
        self.synthesis.validate()
    }

    /// Persist the resolved configuration into the save directory
    pub fn write_manifest(&self) -> Result<PathBuf, ConfigError> {
        std::fs::create_dir_all(&self.data.save_path)
            .map_err(|e| ConfigError::Load(format!("cannot create {}: {e}", self.data.save_path.display())))?;
        let path = self.data.save_path.join(files::RUN_MANIFEST);
        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Load(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| ConfigError::Load(format!("cannot write {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "Wrote run manifest");
        Ok(path)
    }

    /// Render as TOML, usable as a config file for a later run
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Load(e.to_string()))
    }
}
