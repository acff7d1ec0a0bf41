//! Label file to acoustic parameters
//!
//! ```text
//! labels -> codebook -> duration model (or label durations) -> frame timeline
//!        -> acoustic model -> de-normalize -> post-filter -> SynthesisOutput
//! ```

use candle_core::Device;
use ptts_config::constants::features::DURATION_INPUTS;
use ptts_config::SynthesisConfig;
use ptts_core::{ChunkPos, ConfigError, DataError, LabelSequence, Sample};
use ptts_data::{acoustic_inputs, collate, Codebook, TargetKind};
use ptts_model::SequenceModel;
use std::path::Path;

use crate::error::{Result, SynthesisError};
use crate::output::SynthesisOutput;

/// Per-request knobs
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOptions {
    /// Use the label file's durations instead of the duration model
    pub force_dur: bool,
    /// Post-filter factor for cepstral coefficients 1..
    pub pf: f32,
    /// Overrides the label file's speaker
    pub speaker: Option<String>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            force_dur: false,
            pf: 1.0,
            speaker: None,
        }
    }
}

impl From<&SynthesisConfig> for SynthesisOptions {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            force_dur: config.force_dur,
            pf: config.pf,
            speaker: config.speaker.clone(),
        }
    }
}

pub struct Synthesizer {
    codebook: Codebook,
    duration: Option<SequenceModel>,
    acoustic: SequenceModel,
}

impl Synthesizer {
    /// Load the checkpoints named by `config`
    ///
    /// Both paths must be set; the duration model is only loaded when
    /// durations are predicted.
    pub fn load(codebook: Codebook, config: &SynthesisConfig, device: &Device) -> Result<Self> {
        let dur_path = config
            .dur_model
            .as_deref()
            .ok_or(ConfigError::MissingModelPath("dur_model"))?;
        let aco_path = config
            .aco_model
            .as_deref()
            .ok_or(ConfigError::MissingModelPath("aco_model"))?;

        let duration = if config.force_dur {
            tracing::info!("Using label durations, duration model not loaded");
            None
        } else {
            Some(load_kind(dur_path, TargetKind::Duration, device)?)
        };
        let acoustic = load_kind(aco_path, TargetKind::Acoustic, device)?;
        Self::new(codebook, duration, acoustic)
    }

    /// Check both models against the codebook width
    pub fn new(codebook: Codebook, duration: Option<SequenceModel>, acoustic: SequenceModel) -> Result<Self> {
        if let Some(model) = &duration {
            codebook.check_width("duration model inputs", model.spec().input_dim)?;
        }
        codebook.check_width(
            "acoustic model inputs",
            acoustic.spec().input_dim.saturating_sub(DURATION_INPUTS),
        )?;
        acoustic.spec().acoustic_layout()?;
        Ok(Self {
            codebook,
            duration,
            acoustic,
        })
    }

    /// Speaker id and index: explicit choice, else the label file's speaker
    pub fn resolve_speaker(&self, requested: Option<&str>, labels: &LabelSequence) -> Result<(String, usize)> {
        let id = requested
            .or(labels.speaker.as_deref())
            .ok_or(SynthesisError::NoSpeaker)?;
        let models = self.duration.iter().chain(std::iter::once(&self.acoustic));
        let mut index = None;
        for model in models {
            let idx = model
                .spec()
                .speakers
                .index_of(id)
                .ok_or_else(|| DataError::UnknownSpeaker(id.to_string()))?;
            if let Some(previous) = index.filter(|&i| i != idx) {
                return Err(SynthesisError::SpeakerMismatch {
                    speaker: id.to_string(),
                    duration: previous,
                    acoustic: idx,
                });
            }
            index = Some(idx);
        }
        let index = index.ok_or_else(|| DataError::UnknownSpeaker(id.to_string()))?;
        Ok((id.to_string(), index))
    }

    /// Unit durations in seconds predicted by the duration model
    pub fn predict_durations(&self, labels: &LabelSequence, speaker: usize) -> Result<Vec<f32>> {
        let model = self
            .duration
            .as_ref()
            .ok_or(ConfigError::MissingModelPath("dur_model"))?;
        let features = self.codebook.encode(labels)?;
        let durations = run(model, features, labels.units.iter().map(|u| u.silence).collect(), speaker)?;
        Ok(durations.into_iter().map(|d| d.max(0.0)).collect())
    }

    pub fn synthesize(&self, labels: &LabelSequence, options: &SynthesisOptions) -> Result<SynthesisOutput> {
        if labels.is_empty() {
            return Err(DataError::EmptyUtterance("synthesis labels".to_string()).into());
        }
        let (speaker_id, speaker) = self.resolve_speaker(options.speaker.as_deref(), labels)?;

        let durations = if options.force_dur {
            labels.durations()
        } else {
            self.predict_durations(labels, speaker)?
        };

        let spec = self.acoustic.spec();
        let dur_stats = spec
            .input_stats
            .get(&speaker)
            .ok_or_else(|| DataError::MissingStats(speaker_id.clone()))?;
        let (features, silence) = acoustic_inputs(&self.codebook, labels, &durations, dur_stats)?;

        let layout = spec.acoustic_layout()?;
        let width = layout.width();
        let flat = run(&self.acoustic, features, silence, speaker)?;
        let mut frames: Vec<Vec<f32>> = flat.chunks(width).map(<[f32]>::to_vec).collect();

        if options.pf != 1.0 {
            for frame in &mut frames {
                for c in &mut frame[layout.cepstrum()][1..] {
                    *c *= options.pf;
                }
            }
        }

        tracing::info!(
            speaker = %speaker_id,
            units = labels.len(),
            frames = frames.len(),
            force_dur = options.force_dur,
            pf = options.pf,
            "Synthesized utterance"
        );

        Ok(SynthesisOutput {
            speaker: speaker_id,
            layout,
            durations,
            frames,
        })
    }

    /// Synthesize a label file into `save_path`; returns the written files
    pub fn synthesize_file(
        &self,
        lab: &Path,
        options: &SynthesisOptions,
        save_path: &Path,
        write_streams: bool,
    ) -> Result<Vec<std::path::PathBuf>> {
        let labels = LabelSequence::load(lab)?;
        let basename = lab
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| DataError::malformed(lab.display(), "label path has no file name"))?;
        let output = self.synthesize(&labels, options)?;
        output.write(save_path, basename, write_streams)
    }
}

fn load_kind(path: &Path, expected: TargetKind, device: &Device) -> Result<SequenceModel> {
    let (model, info) = SequenceModel::load(path, device)?;
    if model.spec().kind != expected {
        return Err(SynthesisError::wrong_kind(path.display(), expected, model.spec().kind));
    }
    tracing::info!(
        path = %path.display(),
        kind = expected.as_str(),
        epoch = info.epoch,
        metric = %info.metric,
        value = info.value,
        "Loaded model for synthesis"
    );
    Ok(model)
}

/// Forward one unpadded sequence and return its de-normalized predictions
fn run(model: &SequenceModel, features: Vec<f32>, silence: Vec<bool>, speaker: usize) -> Result<Vec<f32>> {
    let spec = model.spec();
    let len = silence.len();
    let sample = Sample {
        utterance: String::new(),
        speaker,
        feature_dim: spec.input_dim,
        features,
        target_dim: spec.target_dim,
        targets: vec![0.0; len * spec.target_dim],
        silence,
        chunk: ChunkPos::default(),
    };
    let batch = collate(&[Some(&sample)], spec.input_dim, spec.target_dim);
    let (output, _) = model.forward(&batch, None, false)?;
    let mut rows = model.decode(&batch, &output)?;
    Ok(rows.pop().unwrap_or_default())
}
