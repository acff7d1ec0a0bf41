use clap::{Parser, Subcommand};
use ptts_config::{EmbActivation, LossKind, ModelConfig, OptimizerKind, RunConfig};
use std::path::PathBuf;

/// Parametric TTS: train duration and acoustic models, synthesize label files
///
/// Values given here override the config file and `PTTS__*` environment
/// variables.
#[derive(Parser, Debug)]
#[command(name = "ptts")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file (TOML, YAML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Train the duration model
    #[arg(long)]
    pub train_dur: bool,

    /// Train the acoustic model
    #[arg(long)]
    pub train_aco: bool,

    /// Label file to synthesize
    #[arg(long)]
    pub synthesize_lab: Option<PathBuf>,

    /// Duration checkpoint for synthesis
    #[arg(long)]
    pub dur_model: Option<PathBuf>,

    /// Acoustic checkpoint for synthesis
    #[arg(long)]
    pub aco_model: Option<PathBuf>,

    /// Speaker config file
    #[arg(long)]
    pub cfg_spk: Option<PathBuf>,

    #[arg(long)]
    pub lab_dir: Option<PathBuf>,

    #[arg(long)]
    pub aco_dir: Option<PathBuf>,

    /// Codebook file
    #[arg(long)]
    pub codebooks: Option<PathBuf>,

    /// Output directory for checkpoints, metrics and synthesis
    #[arg(long)]
    pub save_path: Option<PathBuf>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum number of epochs
    #[arg(long)]
    pub epoch: Option<usize>,

    /// Validation passes without improvement before stopping
    #[arg(long)]
    pub patience: Option<usize>,

    /// Log the training loss every N steps
    #[arg(long)]
    pub log_freq: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub cuda: bool,

    /// Rebuild cached datasets
    #[arg(long)]
    pub force_gen: bool,

    /// Synthesize with the label file's durations
    #[arg(long)]
    pub force_dur: bool,

    /// Post-filter factor for cepstral coefficients 1..
    #[arg(long)]
    pub pf: Option<f32>,

    /// Synthesis speaker (defaults to the label file's speaker)
    #[arg(long)]
    pub synth_spk: Option<String>,

    /// Also write raw f32 stream files when synthesizing
    #[arg(long)]
    pub write_streams: bool,

    #[arg(long)]
    pub loader_workers: Option<usize>,

    #[arg(long)]
    pub parser_workers: Option<usize>,

    /// Speakers left out of training (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_train_spks: Vec<String>,

    /// Speakers left out of validation (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_eval_spks: Vec<String>,

    #[arg(long)]
    pub dur_lr: Option<f64>,
    #[arg(long)]
    pub dur_optim: Option<OptimizerKind>,
    #[arg(long)]
    pub dur_loss: Option<LossKind>,
    #[arg(long)]
    pub dur_mulout: bool,
    #[arg(long)]
    pub dur_q_classes: Option<usize>,
    #[arg(long)]
    pub dur_max_seq_len: Option<usize>,
    #[arg(long)]
    pub dur_max_samples: Option<usize>,
    #[arg(long)]
    pub dur_rnn_size: Option<usize>,
    #[arg(long)]
    pub dur_rnn_layers: Option<usize>,
    #[arg(long)]
    pub dur_emb_size: Option<usize>,
    #[arg(long)]
    pub dur_dropout: Option<f32>,
    /// Sigmoid duration output (min-max normalized targets)
    #[arg(long)]
    pub dur_sigmoid: bool,

    #[arg(long)]
    pub aco_lr: Option<f64>,
    #[arg(long)]
    pub aco_optim: Option<OptimizerKind>,
    #[arg(long)]
    pub aco_loss: Option<LossKind>,
    #[arg(long)]
    pub aco_mulout: bool,
    #[arg(long)]
    pub aco_q_classes: Option<usize>,
    #[arg(long)]
    pub aco_max_seq_len: Option<usize>,
    #[arg(long)]
    pub aco_max_samples: Option<usize>,
    #[arg(long)]
    pub aco_rnn_size: Option<usize>,
    #[arg(long)]
    pub aco_rnn_layers: Option<usize>,
    #[arg(long)]
    pub aco_emb_size: Option<usize>,
    #[arg(long)]
    pub aco_dropout: Option<f32>,
    /// Sigmoid acoustic output (min-max normalized targets)
    #[arg(long)]
    pub aco_sigmoid: bool,

    /// Z-score normalize acoustic targets
    #[arg(long)]
    pub norm_aco: bool,

    /// Activation after the input embedding of both models
    #[arg(long)]
    pub emb_activation: Option<EmbActivation>,

    /// Layer norm after the acoustic embedding
    #[arg(long)]
    pub aco_emb_norm: bool,

    /// Cut acoustic training sequences to this many frames
    #[arg(long)]
    pub aco_train_forced_trim: Option<usize>,

    /// Cut acoustic validation sequences to this many frames
    #[arg(long)]
    pub aco_valid_forced_trim: Option<usize>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Compute per-speaker statistics from the training split
    Stats {
        /// Where to write the updated speaker config (default: overwrite --cfg-spk)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Per-model command-line overrides
struct ModelOverrides {
    lr: Option<f64>,
    optim: Option<OptimizerKind>,
    loss: Option<LossKind>,
    mulout: bool,
    q_classes: Option<usize>,
    max_seq_len: Option<usize>,
    max_samples: Option<usize>,
    rnn_size: Option<usize>,
    rnn_layers: Option<usize>,
    emb_size: Option<usize>,
    dropout: Option<f32>,
    sigmoid: bool,
}

impl ModelOverrides {
    fn apply(self, model: &mut ModelConfig) {
        set(&mut model.lr, self.lr);
        set(&mut model.optim, self.optim);
        set(&mut model.loss, self.loss);
        model.mulout |= self.mulout;
        model.sigmoid |= self.sigmoid;
        if self.q_classes.is_some() {
            model.q_classes = self.q_classes;
        }
        if self.max_seq_len.is_some() {
            model.max_seq_len = self.max_seq_len;
        }
        if self.max_samples.is_some() {
            model.max_samples = self.max_samples;
        }
        set(&mut model.network.rnn_size, self.rnn_size);
        set(&mut model.network.rnn_layers, self.rnn_layers);
        set(&mut model.network.emb_size, self.emb_size);
        set(&mut model.network.dropout, self.dropout);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl Cli {
    /// Apply every flag that was given on top of `config`
    pub fn apply(&self, config: &mut RunConfig) {
        config.train_dur |= self.train_dur;
        config.train_aco |= self.train_aco;
        config.cuda |= self.cuda;
        config.force_gen |= self.force_gen;

        set(&mut config.data.cfg_spk, self.cfg_spk.clone());
        set(&mut config.data.lab_dir, self.lab_dir.clone());
        set(&mut config.data.aco_dir, self.aco_dir.clone());
        set(&mut config.data.codebooks, self.codebooks.clone());
        set(&mut config.data.save_path, self.save_path.clone());

        set(&mut config.batch_size, self.batch_size);
        set(&mut config.epoch, self.epoch);
        set(&mut config.patience, self.patience);
        set(&mut config.log_freq, self.log_freq);
        set(&mut config.seed, self.seed);
        set(&mut config.loader_workers, self.loader_workers);
        set(&mut config.parser_workers, self.parser_workers);
        if !self.exclude_train_spks.is_empty() {
            config.exclude_train_spks = self.exclude_train_spks.clone();
        }
        if !self.exclude_eval_spks.is_empty() {
            config.exclude_eval_spks = self.exclude_eval_spks.clone();
        }

        ModelOverrides {
            lr: self.dur_lr,
            optim: self.dur_optim,
            loss: self.dur_loss,
            mulout: self.dur_mulout,
            q_classes: self.dur_q_classes,
            max_seq_len: self.dur_max_seq_len,
            max_samples: self.dur_max_samples,
            rnn_size: self.dur_rnn_size,
            rnn_layers: self.dur_rnn_layers,
            emb_size: self.dur_emb_size,
            dropout: self.dur_dropout,
            sigmoid: self.dur_sigmoid,
        }
        .apply(&mut config.duration);

        ModelOverrides {
            lr: self.aco_lr,
            optim: self.aco_optim,
            loss: self.aco_loss,
            mulout: self.aco_mulout,
            q_classes: self.aco_q_classes,
            max_seq_len: self.aco_max_seq_len,
            max_samples: self.aco_max_samples,
            rnn_size: self.aco_rnn_size,
            rnn_layers: self.aco_rnn_layers,
            emb_size: self.aco_emb_size,
            dropout: self.aco_dropout,
            sigmoid: self.aco_sigmoid,
        }
        .apply(&mut config.acoustic);

        config.acoustic.normalize |= self.norm_aco;
        config.acoustic.network.emb_norm |= self.aco_emb_norm;
        if let Some(activation) = self.emb_activation {
            config.duration.network.emb_activation = activation;
            config.acoustic.network.emb_activation = activation;
        }
        if self.aco_train_forced_trim.is_some() {
            config.acoustic.train_forced_trim = self.aco_train_forced_trim;
        }
        if self.aco_valid_forced_trim.is_some() {
            config.acoustic.valid_forced_trim = self.aco_valid_forced_trim;
        }

        let synthesis = &mut config.synthesis;
        if self.synthesize_lab.is_some() {
            synthesis.lab = self.synthesize_lab.clone();
        }
        if self.dur_model.is_some() {
            synthesis.dur_model = self.dur_model.clone();
        }
        if self.aco_model.is_some() {
            synthesis.aco_model = self.aco_model.clone();
        }
        if self.synth_spk.is_some() {
            synthesis.speaker = self.synth_spk.clone();
        }
        synthesis.force_dur |= self.force_dur;
        synthesis.write_streams |= self.write_streams;
        set(&mut synthesis.pf, self.pf);
    }
}
