//! Synthesis results on disk
//!
//! - `<basename>.synth.json`: speaker, layout, unit durations and frames
//! - optional raw little-endian f32 streams: `.cc` (all cepstral
//!   coefficients, frame-major), `.fv`, `.lf0`, `.uv` and `.dur`

use ptts_config::constants::frames::FRAME_SHIFT_SECS;
use ptts_core::AcousticLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SynthesisError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub speaker: String,
    pub layout: AcousticLayout,
    /// Unit durations in seconds
    pub durations: Vec<f32>,
    /// De-normalized acoustic frames, `layout.width()` values each
    pub frames: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct SynthDocument<'a> {
    utterance: &'a str,
    frame_shift: f32,
    #[serde(flatten)]
    output: &'a SynthesisOutput,
}

impl SynthesisOutput {
    /// Values of one column over every frame
    pub fn stream(&self, column: usize) -> Vec<f32> {
        self.frames.iter().map(|f| f[column]).collect()
    }

    pub fn cepstrum(&self) -> Vec<f32> {
        let range = self.layout.cepstrum();
        self.frames.iter().flat_map(|f| f[range.clone()].iter().copied()).collect()
    }

    /// Write the JSON document and optionally the raw streams; returns the paths written
    pub fn write(&self, save_path: &Path, basename: &str, write_streams: bool) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(save_path).map_err(|e| SynthesisError::io(save_path.display(), e))?;

        let document = SynthDocument {
            utterance: basename,
            frame_shift: FRAME_SHIFT_SECS,
            output: self,
        };
        let json_path = save_path.join(format!("{basename}.synth.json"));
        let json = serde_json::to_vec_pretty(&document).map_err(|e| SynthesisError::io(json_path.display(), e.into()))?;
        std::fs::write(&json_path, json).map_err(|e| SynthesisError::io(json_path.display(), e))?;
        let mut written = vec![json_path];

        if write_streams {
            let streams = [
                ("cc", self.cepstrum()),
                ("fv", self.stream(self.layout.fv())),
                ("lf0", self.stream(self.layout.lf0())),
                ("uv", self.stream(self.layout.uv())),
                ("dur", self.durations.clone()),
            ];
            for (ext, values) in streams {
                let path = save_path.join(format!("{basename}.{ext}"));
                write_f32_le(&path, &values)?;
                written.push(path);
            }
        }

        tracing::info!(
            dir = %save_path.display(),
            utterance = basename,
            files = written.len(),
            "Wrote synthesis output"
        );
        Ok(written)
    }
}

fn write_f32_le(path: &Path, values: &[f32]) -> Result<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(path, bytes).map_err(|e| SynthesisError::io(path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> SynthesisOutput {
        SynthesisOutput {
            speaker: "72".to_string(),
            layout: AcousticLayout::new(2),
            durations: vec![0.01],
            frames: vec![vec![1.0, 2.0, 0.3, 4.5, 1.0], vec![1.5, 2.5, 0.4, 4.6, 0.0]],
        }
    }

    #[test]
    fn test_streams_split_columns() {
        let out = output();
        assert_eq!(out.cepstrum(), vec![1.0, 2.0, 1.5, 2.5]);
        assert_eq!(out.stream(out.layout.lf0()), vec![4.5, 4.6]);
    }

    #[test]
    fn test_write_raw_streams() {
        let dir = tempfile::tempdir().unwrap();
        let written = output().write(dir.path(), "utt1", true).unwrap();
        assert_eq!(written.len(), 6);

        let uv = std::fs::read(dir.path().join("utt1.uv")).unwrap();
        assert_eq!(uv.len(), 8);
        assert_eq!(f32::from_le_bytes(uv[0..4].try_into().unwrap()), 1.0);

        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("utt1.synth.json")).unwrap()).unwrap();
        assert_eq!(doc["utterance"], "utt1");
        assert_eq!(doc["layout"]["cepstral_order"], 2);
        assert_eq!(doc["frames"].as_array().unwrap().len(), 2);
    }
}
