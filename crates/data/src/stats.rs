//! Per-speaker statistics from the training split
//!
//! Fills `dur_stats` and `aco_stats` of every speaker entry so the result
//! can be saved as the speaker config used for training.

use ptts_core::{AcousticLayout, DataError, FeatureSource, SpeakerConfig, Split, StreamStats};
use rayon::prelude::*;

use crate::error::DatasetError;

/// What a statistics pass computed for one speaker
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerSummary {
    pub speaker: String,
    pub utterances: usize,
    pub units: usize,
    pub frames: usize,
}

/// Compute duration and acoustic statistics over each speaker's training utterances
///
/// Speakers without training utterances keep whatever statistics they had.
pub fn compute_stats(
    source: &dyn FeatureSource,
    config: &mut SpeakerConfig,
    layout: AcousticLayout,
    parser_workers: usize,
) -> Result<Vec<SpeakerSummary>, DatasetError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parser_workers.max(1))
        .build()
        .map_err(|e| DatasetError::Pool(e.to_string()))?;

    let mut summaries = Vec::new();
    for (id, entry) in config.speakers.iter_mut() {
        let utterances = entry.utterances(Split::Train).to_vec();
        if utterances.is_empty() {
            tracing::warn!(speaker = %id, "No training utterances, statistics left unchanged");
            continue;
        }

        let loaded = pool.install(|| {
            utterances
                .par_iter()
                .map(|utt| -> Result<(Vec<f32>, Vec<Vec<f32>>), DataError> {
                    let labels = source.labels(utt)?;
                    let frames = source.acoustics(utt)?;
                    frames.check_width(layout.width())?;
                    Ok((labels.durations(), frames.frames))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let durations: Vec<f32> = loaded.iter().flat_map(|(d, _)| d.iter().copied()).collect();
        let frames: Vec<&[f32]> = loaded
            .iter()
            .flat_map(|(_, f)| f.iter().map(Vec::as_slice))
            .collect();

        entry.dur_stats = StreamStats::from_rows(durations.iter().map(std::slice::from_ref), 1);
        entry.aco_stats = StreamStats::from_rows(frames.iter().copied(), layout.width());

        let summary = SpeakerSummary {
            speaker: id.clone(),
            utterances: utterances.len(),
            units: durations.len(),
            frames: frames.len(),
        };
        tracing::info!(
            speaker = %summary.speaker,
            utterances = summary.utterances,
            units = summary.units,
            frames = summary.frames,
            "Computed speaker statistics"
        );
        summaries.push(summary);
    }
    Ok(summaries)
}
