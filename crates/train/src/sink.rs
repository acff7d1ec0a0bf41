//! JSON-lines metrics sink
//!
//! One record per scalar: `{"wall_time": secs, "step": n, "tag": "...", "value": x}`.

use ptts_config::constants::files::EVENTS;
use ptts_core::MetricsSink;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainError};

#[derive(Serialize)]
struct Event<'a> {
    wall_time: f64,
    step: u64,
    tag: &'a str,
    value: f64,
}

pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Append to `<dir>/events.jsonl`, creating the directory if needed
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| TrainError::io(dir.display(), e))?;
        let path = dir.join(EVENTS);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrainError::io(path.display(), e))?;
        tracing::info!(path = %path.display(), "Writing metrics");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlSink {
    fn scalar(&mut self, tag: &str, value: f64, step: u64) {
        let event = Event {
            wall_time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            step,
            tag,
            value,
        };
        let written = serde_json::to_writer(&mut self.writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = written {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write metric");
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to flush metrics");
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
