//! Sequence datasets for the duration and acoustic models
//!
//! Construction runs in fixed stages:
//! 1. resolve the speakers of the split (exclusions, allowed set)
//! 2. encode every utterance on a rayon pool, or reuse the on-disk cache
//! 3. forced trim, per-speaker caps and the mulout minimum
//! 4. target normalization / quantization through a [`TargetCodec`]
//! 5. chunking for stateful training
//!
//! Samples keep utterance order, and the chunks of one utterance are adjacent.

use ptts_config::Normalization;
use ptts_core::{
    AcousticLayout, ConfigError, DataError, FeatureSource, Sample, SpeakerConfig, SpeakerIndexMap, Split, StreamStats,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::chunk::chunk_sample;
use crate::codebook::Codebook;
use crate::codec::TargetCodec;
use crate::encode::{acoustic_sample, duration_sample};
use crate::error::DatasetError;

/// Which model the dataset feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Duration,
    Acoustic,
}

impl TargetKind {
    /// Short name used in file names and metric prefixes
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duration => "dur",
            Self::Acoustic => "aco",
        }
    }
}

/// Dataset construction options
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub split: Split,
    /// Ignore and rebuild the encoded cache
    pub force_gen: bool,
    pub normalization: Normalization,
    /// Speaker ids left out of this split
    pub exclude_speakers: Vec<String>,
    /// Per-speaker sample cap
    pub max_samples: Option<usize>,
    /// Chunk length for stateful training
    pub max_seq_len: Option<usize>,
    pub q_classes: Option<usize>,
    pub mulout: bool,
    pub min_speaker_samples: usize,
    /// Restrict to these speaker indices (validation of an existing model)
    pub allowed_speakers: Option<BTreeSet<usize>>,
    pub parser_workers: usize,
    /// Acoustic only: trim labels and frames to the shorter stream
    pub trim_to_min: bool,
    /// Acoustic only: cap on frames per utterance
    pub forced_trim: Option<usize>,
}

impl DatasetOptions {
    pub fn new(split: Split) -> Self {
        Self {
            split,
            force_gen: false,
            normalization: Normalization::None,
            exclude_speakers: Vec::new(),
            max_samples: None,
            max_seq_len: None,
            q_classes: None,
            mulout: false,
            min_speaker_samples: 1,
            allowed_speakers: None,
            parser_workers: 1,
            trim_to_min: true,
            forced_trim: None,
        }
    }
}

/// What encoded samples depend on besides the utterance files
#[derive(Debug, Serialize)]
struct CacheKey<'a> {
    feature_dim: usize,
    target_dim: usize,
    codebook: &'a Codebook,
    /// Acoustic only: duration stats behind the normalized-duration inputs
    dur_stats: BTreeMap<usize, &'a StreamStats>,
}

impl CacheKey<'_> {
    fn fingerprint(&self) -> Result<String, DatasetError> {
        serde_json::to_string(self).map_err(|e| DataError::malformed("dataset cache key", e.to_string()).into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedCache {
    /// Serialized [`CacheKey`]; any difference invalidates the cache
    key: String,
    samples: Vec<Sample>,
}

struct Job {
    utterance: String,
    speaker_id: String,
    speaker: usize,
}

/// Encoded, normalized and (optionally) chunked samples of one split
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    kind: TargetKind,
    split: Split,
    samples: Vec<Sample>,
    speakers: SpeakerIndexMap,
    codec: TargetCodec,
    input_stats: BTreeMap<usize, StreamStats>,
    feature_dim: usize,
    target_dim: usize,
}

impl SequenceDataset {
    /// Per-unit duration dataset
    pub fn duration(
        source: &dyn FeatureSource,
        codebook: &Codebook,
        config: &SpeakerConfig,
        options: &DatasetOptions,
        rng: &mut StdRng,
    ) -> Result<Self, DatasetError> {
        Self::build(TargetKind::Duration, source, codebook, config, None, options, rng)
    }

    /// Per-frame acoustic dataset
    pub fn acoustic(
        source: &dyn FeatureSource,
        codebook: &Codebook,
        config: &SpeakerConfig,
        layout: AcousticLayout,
        options: &DatasetOptions,
        rng: &mut StdRng,
    ) -> Result<Self, DatasetError> {
        Self::build(TargetKind::Acoustic, source, codebook, config, Some(layout), options, rng)
    }

    /// Assemble a dataset from already encoded samples
    pub fn from_parts(
        kind: TargetKind,
        split: Split,
        samples: Vec<Sample>,
        speakers: SpeakerIndexMap,
        codec: TargetCodec,
    ) -> Self {
        let feature_dim = samples.first().map_or(0, |s| s.feature_dim);
        let target_dim = codec.width;
        Self {
            kind,
            split,
            samples,
            speakers,
            codec,
            input_stats: BTreeMap::new(),
            feature_dim,
            target_dim,
        }
    }

    fn build(
        kind: TargetKind,
        source: &dyn FeatureSource,
        codebook: &Codebook,
        config: &SpeakerConfig,
        layout: Option<AcousticLayout>,
        options: &DatasetOptions,
        rng: &mut StdRng,
    ) -> Result<Self, DatasetError> {
        let split = options.split;
        let all = config.index_map()?;
        let active = resolve_speakers(&all, options)?;

        let jobs: Vec<Job> = active
            .pairs()
            .flat_map(|(id, idx)| {
                config
                    .get(id)
                    .map(|e| e.utterances(split))
                    .unwrap_or_default()
                    .iter()
                    .map(move |utt| Job {
                        utterance: utt.clone(),
                        speaker_id: id.to_string(),
                        speaker: idx,
                    })
            })
            .collect();

        let dur_stats = config.dur_stats();
        let (feature_dim, target_dim) = match (kind, layout) {
            (TargetKind::Acoustic, Some(layout)) => (
                codebook.width() + ptts_config::constants::features::DURATION_INPUTS,
                layout.width(),
            ),
            _ => (codebook.width(), 1),
        };

        tracing::info!(
            kind = kind.as_str(),
            split = %split,
            speakers = active.len(),
            utterances = jobs.len(),
            "Building dataset"
        );

        let cache_key = CacheKey {
            feature_dim,
            target_dim,
            codebook,
            dur_stats: match kind {
                TargetKind::Acoustic => dur_stats
                    .iter()
                    .filter(|(idx, _)| active.contains_index(**idx))
                    .map(|(&idx, stats)| (idx, stats))
                    .collect(),
                TargetKind::Duration => BTreeMap::new(),
            },
        }
        .fingerprint()?;
        let cache_path = source
            .cache_dir()
            .map(|dir| cache_file(dir, kind, split, options.trim_to_min));
        let mut samples = match cache_path.as_deref().and_then(|p| read_cache(p, options, &jobs, &cache_key)) {
            Some(samples) => samples,
            None => {
                let samples = encode_jobs(kind, source, codebook, layout, &dur_stats, &jobs, options)?;
                if let Some(path) = &cache_path {
                    write_cache(path, cache_key, &samples);
                }
                samples
            }
        };

        if let Some(n) = options.forced_trim {
            for sample in samples.iter_mut().filter(|s| s.len() > n) {
                *sample = sample.slice(0, n, sample.chunk);
            }
        }

        let kept = select_samples(&samples, options, rng)?;
        let samples: Vec<Sample> = samples
            .into_iter()
            .enumerate()
            .filter(|(i, _)| kept.contains(i))
            .map(|(_, s)| s)
            .collect();
        let present: BTreeSet<usize> = samples.iter().map(|s| s.speaker).collect();
        let speakers = active.retain(|idx| present.contains(&idx));

        let stats = match kind {
            TargetKind::Duration => config.dur_stats(),
            TargetKind::Acoustic => config.aco_stats(),
        };
        let stats: BTreeMap<usize, StreamStats> = stats.into_iter().filter(|(idx, _)| present.contains(idx)).collect();
        let codec = TargetCodec::new(options.normalization, options.q_classes, stats, target_dim)?;
        codec.require(&speakers)?;

        let input_stats = match kind {
            TargetKind::Acoustic => dur_stats.into_iter().filter(|(idx, _)| present.contains(idx)).collect(),
            TargetKind::Duration => BTreeMap::new(),
        };

        let mut samples = samples;
        for sample in &mut samples {
            for row in sample.targets.chunks_mut(target_dim) {
                codec.encode_row(sample.speaker, row)?;
            }
        }

        if let Some(max_len) = options.max_seq_len {
            samples = samples.iter().flat_map(|s| chunk_sample(s, max_len)).collect();
        }

        let dataset = Self {
            kind,
            split,
            samples,
            speakers,
            codec,
            input_stats,
            feature_dim,
            target_dim,
        };
        dataset.log_summary();
        Ok(dataset)
    }

    fn log_summary(&self) {
        for (idx, count) in self.len_by_spk() {
            tracing::info!(
                kind = self.kind.as_str(),
                split = %self.split,
                speaker = self.speakers.id_of(idx).unwrap_or("?"),
                samples = count,
                "Speaker samples"
            );
        }
        match serde_json::to_string(&self.codec.stats) {
            Ok(summary) => tracing::debug!(kind = self.kind.as_str(), stats = %summary, "Target statistics"),
            Err(e) => tracing::warn!(kind = self.kind.as_str(), error = %e, "Could not serialize statistics summary"),
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample(&self, index: usize) -> &Sample {
        &self.samples[index]
    }

    pub fn speakers(&self) -> &SpeakerIndexMap {
        &self.speakers
    }

    pub fn codec(&self) -> &TargetCodec {
        &self.codec
    }

    /// Duration statistics used to build acoustic inputs (empty for duration data)
    pub fn input_stats(&self) -> &BTreeMap<usize, StreamStats> {
        &self.input_stats
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    /// Sample counts per speaker index
    pub fn len_by_spk(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.samples {
            *counts.entry(sample.speaker).or_insert(0) += 1;
        }
        counts
    }

    /// Sample indices grouped by utterance, chunks in order
    pub fn utterance_groups(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (i, sample) in self.samples.iter().enumerate() {
            let continues = !sample.starts_utterance()
                && groups
                    .last()
                    .and_then(|g| g.last())
                    .is_some_and(|&prev| self.samples[prev].utterance == sample.utterance);
            match groups.last_mut() {
                Some(group) if continues => group.push(i),
                _ => groups.push(vec![i]),
            }
        }
        groups
    }
}

fn resolve_speakers(all: &SpeakerIndexMap, options: &DatasetOptions) -> Result<SpeakerIndexMap, ConfigError> {
    for id in &options.exclude_speakers {
        if all.index_of(id).is_none() {
            tracing::warn!(speaker = %id, split = %options.split, "Excluded speaker is not in the speaker config");
        }
    }
    let excluded: BTreeSet<usize> = options
        .exclude_speakers
        .iter()
        .filter_map(|id| all.index_of(id))
        .collect();
    let active = all.retain(|idx| {
        !excluded.contains(&idx) && options.allowed_speakers.as_ref().map_or(true, |a| a.contains(&idx))
    });
    if active.is_empty() {
        return Err(ConfigError::NoSpeakers {
            split: options.split.to_string(),
            reason: "speaker exclusions".to_string(),
        });
    }
    Ok(active)
}

/// Indices of samples that survive the per-speaker cap and the mulout minimum
fn select_samples(
    samples: &[Sample],
    options: &DatasetOptions,
    rng: &mut StdRng,
) -> Result<BTreeSet<usize>, ConfigError> {
    let mut by_spk: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, sample) in samples.iter().enumerate() {
        by_spk.entry(sample.speaker).or_default().push(i);
    }

    if let Some(cap) = options.max_samples {
        for positions in by_spk.values_mut() {
            if positions.len() > cap {
                if options.split == Split::Train {
                    positions.shuffle(rng);
                }
                positions.truncate(cap);
                positions.sort_unstable();
            }
        }
    }

    if options.mulout {
        by_spk.retain(|idx, positions| {
            let keep = positions.len() >= options.min_speaker_samples;
            if !keep {
                tracing::warn!(
                    speaker = idx,
                    samples = positions.len(),
                    minimum = options.min_speaker_samples,
                    "Dropping speaker below the mulout minimum"
                );
            }
            keep
        });
    }

    if by_spk.is_empty() {
        let reason = if options.mulout {
            format!("requiring {} samples per speaker", options.min_speaker_samples)
        } else {
            "loading utterances".to_string()
        };
        return Err(ConfigError::NoSpeakers {
            split: options.split.to_string(),
            reason,
        });
    }
    Ok(by_spk.into_values().flatten().collect())
}

fn encode_jobs(
    kind: TargetKind,
    source: &dyn FeatureSource,
    codebook: &Codebook,
    layout: Option<AcousticLayout>,
    dur_stats: &BTreeMap<usize, StreamStats>,
    jobs: &[Job],
    options: &DatasetOptions,
) -> Result<Vec<Sample>, DatasetError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.parser_workers.max(1))
        .build()
        .map_err(|e| DatasetError::Pool(e.to_string()))?;

    let encode = |job: &Job| -> Result<Sample, DataError> {
        let labels = source.labels(&job.utterance)?;
        match (kind, layout) {
            (TargetKind::Acoustic, Some(layout)) => {
                let stats = dur_stats
                    .get(&job.speaker)
                    .ok_or_else(|| DataError::MissingStats(job.speaker_id.clone()))?;
                let frames = source.acoustics(&job.utterance)?;
                acoustic_sample(
                    codebook,
                    &labels,
                    &frames,
                    layout,
                    stats,
                    &job.utterance,
                    job.speaker,
                    options.trim_to_min,
                )
            }
            _ => duration_sample(codebook, &labels, &job.utterance, job.speaker),
        }
    };

    let samples = pool.install(|| jobs.par_iter().map(encode).collect::<Result<Vec<_>, _>>())?;
    Ok(samples)
}

fn cache_file(dir: &Path, kind: TargetKind, split: Split, trim_to_min: bool) -> PathBuf {
    let trim = if kind == TargetKind::Acoustic && trim_to_min { "_trim" } else { "" };
    dir.join(format!("{}_{}{}.json", kind.as_str(), split, trim))
}

/// Cached samples for `jobs`, or `None` when the cache is absent, stale or unreadable
fn read_cache(
    path: &Path,
    options: &DatasetOptions,
    jobs: &[Job],
    key: &str,
) -> Option<Vec<Sample>> {
    if options.force_gen || !path.exists() {
        return None;
    }
    let cache: EncodedCache = match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|c| serde_json::from_str(&c).map_err(|e| e.to_string()))
    {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable dataset cache");
            return None;
        }
    };
    if cache.key != key {
        tracing::info!(path = %path.display(), "Dataset cache built from other codebook or statistics, rebuilding");
        return None;
    }

    let mut by_utt: HashMap<String, Sample> = cache.samples.into_iter().map(|s| (s.utterance.clone(), s)).collect();
    let mut samples = Vec::with_capacity(jobs.len());
    for job in jobs {
        match by_utt.remove(&job.utterance) {
            Some(sample) if sample.speaker == job.speaker => samples.push(sample),
            _ => {
                tracing::info!(path = %path.display(), utterance = %job.utterance, "Dataset cache incomplete, rebuilding");
                return None;
            }
        }
    }
    tracing::info!(path = %path.display(), samples = samples.len(), "Loaded dataset cache");
    Some(samples)
}

fn write_cache(path: &Path, key: String, samples: &[Sample]) {
    let cache = EncodedCache {
        key,
        samples: samples.to_vec(),
    };
    let result = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .map_err(|e| e.to_string())
        .and_then(|_| serde_json::to_string(&cache).map_err(|e| e.to_string()))
        .and_then(|content| std::fs::write(path, content).map_err(|e| e.to_string()));
    match result {
        Ok(()) => tracing::info!(path = %path.display(), samples = samples.len(), "Wrote dataset cache"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not write dataset cache"),
    }
}
