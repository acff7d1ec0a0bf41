//! Centralized constants for training and synthesis
//!
//! Single source of truth for default values and fixed format parameters
//! used across the workspace.

/// Linguistic feature encoding
pub mod features {
    /// Boolean factor bits appended after the codebook features
    pub const BOOLEAN_FACTORS: usize = 6;

    /// Extra acoustic-model inputs per frame (normalized unit duration, position in unit)
    pub const DURATION_INPUTS: usize = 2;
}

/// Acoustic frame timing
pub mod frames {
    /// Frame shift in seconds
    pub const FRAME_SHIFT_SECS: f32 = 0.005;

    /// Default cepstral order (acoustic frame width = order + 3)
    pub const CEPSTRAL_ORDER: usize = 40;
}

/// Early-stopping targets
pub mod eval_targets {
    pub const DURATION: &str = "total_nosil_dur_rmse";
    pub const ACOUSTIC: &str = "total_nosil_aco_mcd";
}

/// Checkpoint and output file names
pub mod files {
    pub const DURATION_CHECKPOINT: &str = "dur_model.ckpt";
    pub const ACOUSTIC_CHECKPOINT: &str = "aco_model.ckpt";
    pub const RUN_MANIFEST: &str = "run_manifest.json";
    pub const EVENTS: &str = "events.jsonl";
}

/// Plateau learning-rate schedule defaults
pub mod plateau {
    pub const FACTOR: f64 = 0.33;
    pub const MIN_LR: f64 = 1e-6;
}

/// Training defaults
pub mod training {
    pub const BATCH_SIZE: usize = 50;
    pub const EPOCHS: usize = 50;
    pub const LOG_FREQ: usize = 25;
    pub const PATIENCE: usize = 5;
    pub const SEED: u64 = 1991;
    pub const LOADER_WORKERS: usize = 2;
    pub const PARSER_WORKERS: usize = 4;
    pub const LEARNING_RATE: f64 = 0.001;
    pub const DROPOUT: f32 = 0.5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_acoustic_width() {
        assert_eq!(frames::CEPSTRAL_ORDER + 3, 43);
    }

    #[test]
    fn test_training_defaults_valid() {
        assert!(training::DROPOUT >= 0.0 && training::DROPOUT < 1.0);
        assert!(plateau::FACTOR > 0.0 && plateau::FACTOR < 1.0);
    }
}
