//! Speakers: index map, per-speaker statistics and the speaker config file
//!
//! The speaker config file is the single source of truth for speaker indices.
//! Indices are dense and stable across training, validation and synthesis so
//! that statistics and per-speaker output heads line up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, DataError};
use crate::sample::Split;

/// Floor applied to standard deviations before dividing
pub const MIN_STD: f32 = 1e-5;

/// Per-dimension `{mean, std, min, max}` of one target stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl StreamStats {
    /// Scalar statistics (duration stream)
    pub fn scalar(mean: f32, std: f32, min: f32, max: f32) -> Self {
        Self {
            mean: vec![mean],
            std: vec![std],
            min: vec![min],
            max: vec![max],
        }
    }

    /// Compute statistics over rows of width `width`
    ///
    /// Returns `None` when no rows are given.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a [f32]>, width: usize) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = vec![0f64; width];
        let mut sum_sq = vec![0f64; width];
        let mut min = vec![f32::INFINITY; width];
        let mut max = vec![f32::NEG_INFINITY; width];

        for row in rows {
            count += 1;
            for (d, &v) in row.iter().take(width).enumerate() {
                sum[d] += v as f64;
                sum_sq[d] += (v as f64) * (v as f64);
                min[d] = min[d].min(v);
                max[d] = max[d].max(v);
            }
        }

        if count == 0 {
            return None;
        }

        let n = count as f64;
        let mean: Vec<f32> = sum.iter().map(|s| (s / n) as f32).collect();
        let std = sum_sq
            .iter()
            .zip(&sum)
            .map(|(sq, s)| {
                let m = s / n;
                ((sq / n - m * m).max(0.0)).sqrt() as f32
            })
            .collect();

        Some(Self {
            mean,
            std,
            min,
            max,
        })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// Standard deviation of dimension `d`, floored at [`MIN_STD`]
    pub fn safe_std(&self, d: usize) -> f32 {
        self.std[d].max(MIN_STD)
    }

    /// Value range of dimension `d`, floored at [`MIN_STD`]
    pub fn range(&self, d: usize) -> f32 {
        (self.max[d] - self.min[d]).max(MIN_STD)
    }

    /// Check every vector has `width` entries
    pub fn check_width(&self, what: &str, width: usize) -> Result<(), DataError> {
        for (name, v) in [
            ("mean", &self.mean),
            ("std", &self.std),
            ("min", &self.min),
            ("max", &self.max),
        ] {
            if v.len() != width {
                return Err(DataError::dimension(format!("{what} {name}"), width, v.len()));
            }
        }
        Ok(())
    }
}

/// One speaker's record in the speaker config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerEntry {
    /// Dense speaker index
    pub idx: usize,
    /// Duration statistics (width 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur_stats: Option<StreamStats>,
    /// Acoustic statistics (width = acoustic layout width)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aco_stats: Option<StreamStats>,
    /// Training utterance ids
    #[serde(default)]
    pub train: Vec<String>,
    /// Validation utterance ids
    #[serde(default)]
    pub valid: Vec<String>,
}

impl SpeakerEntry {
    pub fn utterances(&self, split: Split) -> &[String] {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
        }
    }
}

/// Speaker config file: speaker id -> entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerConfig {
    pub speakers: BTreeMap<String, SpeakerEntry>,
}

impl SpeakerConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| DataError::malformed(path.display(), e.to_string()))
    }

    /// Write as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DataError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, speaker: &str) -> Option<&SpeakerEntry> {
        self.speakers.get(speaker)
    }

    /// Build the bidirectional index map
    pub fn index_map(&self) -> Result<SpeakerIndexMap, ConfigError> {
        SpeakerIndexMap::from_pairs(self.speakers.iter().map(|(id, e)| (id.clone(), e.idx)))
    }

    /// Duration statistics keyed by speaker index
    pub fn dur_stats(&self) -> BTreeMap<usize, StreamStats> {
        self.speakers
            .values()
            .filter_map(|e| e.dur_stats.clone().map(|s| (e.idx, s)))
            .collect()
    }

    /// Acoustic statistics keyed by speaker index
    pub fn aco_stats(&self) -> BTreeMap<usize, StreamStats> {
        self.speakers
            .values()
            .filter_map(|e| e.aco_stats.clone().map(|s| (e.idx, s)))
            .collect()
    }
}

/// Bidirectional speaker id <-> dense index map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakerIndexMap {
    by_id: BTreeMap<String, usize>,
    by_idx: BTreeMap<usize, String>,
}

impl SpeakerIndexMap {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, usize)>) -> Result<Self, ConfigError> {
        let mut map = Self::default();
        for (id, idx) in pairs {
            if let Some(first) = map.by_idx.get(&idx) {
                return Err(ConfigError::DuplicateSpeakerIndex {
                    index: idx,
                    first: first.clone(),
                    second: id,
                });
            }
            map.by_idx.insert(idx, id.clone());
            map.by_id.insert(id, idx);
        }
        Ok(map)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn id_of(&self, idx: usize) -> Option<&str> {
        self.by_idx.get(&idx).map(|s| s.as_str())
    }

    pub fn contains_index(&self, idx: usize) -> bool {
        self.by_idx.contains_key(&idx)
    }

    /// Indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_idx.keys().copied()
    }

    /// `(id, index)` pairs in ascending index order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.by_idx.iter().map(|(idx, id)| (id.as_str(), *idx))
    }

    /// Keep only the given indices
    pub fn retain(&self, keep: impl Fn(usize) -> bool) -> Self {
        let by_idx: BTreeMap<usize, String> = self
            .by_idx
            .iter()
            .filter(|(idx, _)| keep(**idx))
            .map(|(idx, id)| (*idx, id.clone()))
            .collect();
        let by_id = by_idx.iter().map(|(idx, id)| (id.clone(), *idx)).collect();
        Self { by_id, by_idx }
    }

    pub fn len(&self) -> usize {
        self.by_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_idx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_rows() {
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let stats = StreamStats::from_rows(rows.iter().map(|r| r.as_slice()), 2).unwrap();
        assert_eq!(stats.mean, vec![2.0, 10.0]);
        assert!((stats.std[0] - 1.0).abs() < 1e-6);
        assert_eq!(stats.std[1], 0.0);
        assert_eq!(stats.safe_std(1), MIN_STD);
        assert_eq!(stats.min, vec![1.0, 10.0]);
        assert_eq!(stats.max, vec![3.0, 10.0]);
    }

    #[test]
    fn test_stats_from_no_rows() {
        assert!(StreamStats::from_rows(std::iter::empty(), 3).is_none());
    }

    #[test]
    fn test_index_map_bidirectional() {
        let map = SpeakerIndexMap::from_pairs(vec![("72".to_string(), 0), ("73".to_string(), 1)]).unwrap();
        assert_eq!(map.index_of("73"), Some(1));
        assert_eq!(map.id_of(0), Some("72"));
        assert_eq!(map.indices().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_index_map_rejects_duplicates() {
        let err = SpeakerIndexMap::from_pairs(vec![("a".to_string(), 3), ("b".to_string(), 3)]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSpeakerIndex { index: 3, .. }));
    }

    #[test]
    fn test_speaker_config_roundtrip_json() {
        let json = r#"{
            "72": {"idx": 0, "dur_stats": {"mean": [0.1], "std": [0.05], "min": [0.01], "max": [0.4]},
                   "train": ["u1", "u2"], "valid": ["u3"]},
            "73": {"idx": 1}
        }"#;
        let cfg: SpeakerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.speakers.len(), 2);
        assert_eq!(cfg.get("72").unwrap().utterances(Split::Valid), &["u3".to_string()]);
        assert_eq!(cfg.dur_stats().len(), 1);
        assert!(cfg.aco_stats().is_empty());
    }
}
