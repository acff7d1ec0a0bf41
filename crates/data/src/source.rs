//! JSON-file feature source
//!
//! Reads `<lab_dir>/<utt>.json` label files and `<aco_dir>/<utt>.json`
//! acoustic files. Encoded datasets are cached in a sibling of the label
//! directory (`<lab_dir>.cache`).

use ptts_core::{AcousticFrames, DataError, FeatureSource, LabelSequence};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JsonFeatureSource {
    lab_dir: PathBuf,
    aco_dir: PathBuf,
    cache_dir: PathBuf,
}

impl JsonFeatureSource {
    pub fn new(lab_dir: impl Into<PathBuf>, aco_dir: impl Into<PathBuf>) -> Self {
        let lab_dir = lab_dir.into();
        let cache_dir = lab_dir.with_extension("cache");
        Self {
            lab_dir,
            aco_dir: aco_dir.into(),
            cache_dir,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn label_path(&self, utterance: &str) -> PathBuf {
        self.lab_dir.join(format!("{utterance}.json"))
    }

    pub fn acoustic_path(&self, utterance: &str) -> PathBuf {
        self.aco_dir.join(format!("{utterance}.json"))
    }
}

impl FeatureSource for JsonFeatureSource {
    fn labels(&self, utterance: &str) -> Result<LabelSequence, DataError> {
        let path = self.label_path(utterance);
        let labels = LabelSequence::load(&path)?;
        if labels.is_empty() {
            return Err(DataError::EmptyUtterance(utterance.to_string()));
        }
        Ok(labels)
    }

    fn acoustics(&self, utterance: &str) -> Result<AcousticFrames, DataError> {
        let frames = AcousticFrames::load(self.acoustic_path(utterance))?;
        if frames.is_empty() {
            return Err(DataError::EmptyUtterance(utterance.to_string()));
        }
        Ok(frames)
    }

    fn cache_dir(&self) -> Option<&Path> {
        Some(&self.cache_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let source = JsonFeatureSource::new("data/lab", "data/aco");
        assert_eq!(source.label_path("u1"), PathBuf::from("data/lab/u1.json"));
        assert_eq!(source.acoustic_path("u1"), PathBuf::from("data/aco/u1.json"));
        assert_eq!(source.cache_dir(), Some(Path::new("data/lab.cache")));
    }

    #[test]
    fn test_empty_labels_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u1.json"), r#"{"units": []}"#).unwrap();
        let source = JsonFeatureSource::new(dir.path(), dir.path());
        assert!(matches!(source.labels("u1"), Err(DataError::EmptyUtterance(_))));
    }
}
