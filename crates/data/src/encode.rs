//! Utterance encoding: label units and acoustic frames to [`Sample`]s
//!
//! Duration samples have one step per linguistic unit. Acoustic samples have
//! one step per frame; every frame carries its unit's linguistic features
//! plus `[normalized unit duration, relative position in unit]`.

use ptts_config::constants::features::DURATION_INPUTS;
use ptts_config::constants::frames::FRAME_SHIFT_SECS;
use ptts_core::{AcousticFrames, AcousticLayout, ChunkPos, DataError, LabelSequence, Sample, StreamStats};

use crate::codebook::Codebook;

/// Frames spanned by a unit of `duration` seconds (at least one)
pub fn frame_count(duration: f32) -> usize {
    ((duration / FRAME_SHIFT_SECS).round().max(0.0) as usize).max(1)
}

/// One sample per utterance, target = unit duration in seconds
pub fn duration_sample(
    codebook: &Codebook,
    labels: &LabelSequence,
    utterance: &str,
    speaker: usize,
) -> Result<Sample, DataError> {
    Ok(Sample {
        utterance: utterance.to_string(),
        speaker,
        feature_dim: codebook.width(),
        features: codebook.encode(labels)?,
        target_dim: 1,
        targets: labels.durations(),
        silence: labels.units.iter().map(|u| u.silence).collect(),
        chunk: ChunkPos::default(),
    })
}

/// Frame-level acoustic model inputs for the given unit durations
///
/// Returns row-major features (`codebook width + 2` per frame) and per-frame
/// silence flags.
pub fn acoustic_inputs(
    codebook: &Codebook,
    labels: &LabelSequence,
    durations: &[f32],
    dur_stats: &StreamStats,
) -> Result<(Vec<f32>, Vec<bool>), DataError> {
    if durations.len() != labels.len() {
        return Err(DataError::dimension("unit durations", labels.len(), durations.len()));
    }
    dur_stats.check_width("duration statistics", 1)?;

    let width = codebook.width() + DURATION_INPUTS;
    let total: usize = durations.iter().map(|&d| frame_count(d)).sum();
    let mut features = Vec::with_capacity(total * width);
    let mut silence = Vec::with_capacity(total);

    for (unit, &dur) in labels.units.iter().zip(durations) {
        let encoded = codebook.encode_unit(unit)?;
        let norm_dur = (dur - dur_stats.mean[0]) / dur_stats.safe_std(0);
        let n = frame_count(dur);
        for i in 0..n {
            features.extend_from_slice(&encoded);
            features.push(norm_dur);
            features.push((i as f32 + 0.5) / n as f32);
            silence.push(unit.silence);
        }
    }
    Ok((features, silence))
}

/// Align labels with acoustic frames into one acoustic sample
///
/// With `trim_to_min` both streams are cut to the shorter length; otherwise
/// differing lengths are a data error.
#[allow(clippy::too_many_arguments)]
pub fn acoustic_sample(
    codebook: &Codebook,
    labels: &LabelSequence,
    frames: &AcousticFrames,
    layout: AcousticLayout,
    dur_stats: &StreamStats,
    utterance: &str,
    speaker: usize,
    trim_to_min: bool,
) -> Result<Sample, DataError> {
    frames.check_width(layout.width())?;
    let (mut features, mut silence) = acoustic_inputs(codebook, labels, &labels.durations(), dur_stats)?;
    let feature_dim = codebook.width() + DURATION_INPUTS;

    let label_frames = silence.len();
    let len = if trim_to_min {
        label_frames.min(frames.len())
    } else if label_frames != frames.len() {
        return Err(DataError::dimension(
            format!("label frames of {utterance}"),
            frames.len(),
            label_frames,
        ));
    } else {
        label_frames
    };

    if len < label_frames {
        tracing::debug!(utterance, label_frames, acoustic_frames = frames.len(), "Trimming to shorter stream");
    }
    features.truncate(len * feature_dim);
    silence.truncate(len);
    let targets = frames.frames[..len].iter().flatten().copied().collect();

    Ok(Sample {
        utterance: utterance.to_string(),
        speaker,
        feature_dim,
        features,
        target_dim: layout.width(),
        targets,
        silence,
        chunk: ChunkPos::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptts_core::{LabelUnit, LabelValue};
    use std::collections::BTreeMap;

    fn codebook() -> Codebook {
        serde_json::from_str(r#"{"phone": ["a", "sil"]}"#).unwrap()
    }

    fn labels(durations: &[f32]) -> LabelSequence {
        let units = durations
            .iter()
            .enumerate()
            .map(|(i, &duration)| {
                let mut features = BTreeMap::new();
                let phone = if i == 0 { "sil" } else { "a" };
                features.insert("phone".to_string(), LabelValue::category(phone));
                LabelUnit {
                    features,
                    factors: vec![false; 6],
                    duration,
                    silence: i == 0,
                }
            })
            .collect();
        LabelSequence { speaker: None, units }
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(0.05), 10);
        assert_eq!(frame_count(0.0), 1);
        assert_eq!(frame_count(0.0124), 2);
    }

    #[test]
    fn test_duration_sample() {
        let s = duration_sample(&codebook(), &labels(&[0.1, 0.05]), "u", 2).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.feature_dim, 8);
        assert_eq!(s.targets, vec![0.1, 0.05]);
        assert_eq!(s.silence, vec![true, false]);
    }

    #[test]
    fn test_acoustic_inputs_positions() {
        let stats = StreamStats::scalar(0.01, 0.01, 0.0, 1.0);
        let (features, silence) = acoustic_inputs(&codebook(), &labels(&[0.01, 0.02]), &[0.01, 0.02], &stats).unwrap();
        assert_eq!(silence, vec![true, true, false, false, false, false]);
        let row = |t: usize| &features[t * 10..(t + 1) * 10];
        assert_eq!(row(0)[8], 0.0);
        assert!((row(0)[9] - 0.25).abs() < 1e-6);
        assert!((row(2)[8] - 1.0).abs() < 1e-4);
        assert!((row(5)[9] - 0.875).abs() < 1e-6);
    }

    #[test]
    fn test_acoustic_trim_to_min() {
        let stats = StreamStats::scalar(0.01, 0.01, 0.0, 1.0);
        let layout = AcousticLayout::new(2);
        let frames = AcousticFrames {
            frames: vec![vec![0.5; 5]; 4],
        };
        let lab = labels(&[0.01, 0.02]);
        let s = acoustic_sample(&codebook(), &lab, &frames, layout, &stats, "u", 0, true).unwrap();
        assert_eq!(s.len(), 4);
        assert_eq!(s.targets.len(), 4 * 5);

        let err = acoustic_sample(&codebook(), &lab, &frames, layout, &stats, "u", 0, false).unwrap_err();
        assert!(matches!(err, DataError::DimensionMismatch { .. }));
    }
}
