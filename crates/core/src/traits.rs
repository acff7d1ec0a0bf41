//! Collaborator interfaces
//!
//! Raw feature extraction and dashboard writing live outside the training
//! core; these traits are the seams.

use std::collections::BTreeMap;

use crate::error::DataError;
use crate::label::{AcousticFrames, LabelSequence};

/// Produces raw labels and acoustic frames for an utterance id
pub trait FeatureSource: Send + Sync {
    /// Linguistic label sequence of an utterance
    fn labels(&self, utterance: &str) -> Result<LabelSequence, DataError>;

    /// Acoustic frames of an utterance
    fn acoustics(&self, utterance: &str) -> Result<AcousticFrames, DataError>;

    /// Directory where encoded datasets may be cached
    fn cache_dir(&self) -> Option<&std::path::Path> {
        None
    }
}

/// Accepts named scalar metrics keyed by step
pub trait MetricsSink: Send {
    fn scalar(&mut self, tag: &str, value: f64, step: u64);

    /// Record every entry of a metric map under `prefix/`
    fn scalars(&mut self, prefix: &str, values: &BTreeMap<String, f64>, step: u64) {
        for (name, value) in values {
            self.scalar(&format!("{prefix}/{name}"), *value, step);
        }
    }

    fn flush(&mut self) {}
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn scalar(&mut self, _tag: &str, _value: f64, _step: u64) {}
}

/// Sink that keeps every scalar in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<(String, f64, u64)>,
}

impl MemorySink {
    pub fn values(&self, tag: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|(t, _, _)| t == tag)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn scalar(&mut self, tag: &str, value: f64, step: u64) {
        self.records.push((tag.to_string(), value, step));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_prefix() {
        let mut sink = MemorySink::default();
        let mut values = BTreeMap::new();
        values.insert("rmse".to_string(), 0.5);
        sink.scalars("valid", &values, 3);
        assert_eq!(sink.values("valid/rmse"), vec![0.5]);
    }
}
