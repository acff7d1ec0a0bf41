//! Safetensors checkpoints
//!
//! One file per model: the weights as tensors, and in the header metadata
//! the JSON-encoded [`ModelSpec`], [`TargetCodec`] and [`CheckpointInfo`].
//! Writes go to a temporary file that is renamed over the target.

use candle_core::{Device, Tensor};
use ptts_data::TargetCodec;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ModelError, Result};
use crate::model::SequenceModel;
use crate::spec::ModelSpec;

const SPEC_KEY: &str = "ptts.spec";
const CODEC_KEY: &str = "ptts.codec";
const INFO_KEY: &str = "ptts.info";

/// Where a checkpoint came from in training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub epoch: usize,
    pub metric: String,
    pub value: f64,
}

fn to_json<T: Serialize>(path: &Path, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ModelError::checkpoint(path.display(), e.to_string()))
}

fn from_metadata<T: for<'de> Deserialize<'de>>(
    path: &Path,
    metadata: &HashMap<String, String>,
    key: &str,
) -> Result<T> {
    let raw = metadata
        .get(key)
        .ok_or_else(|| ModelError::checkpoint(path.display(), format!("missing `{key}` metadata")))?;
    serde_json::from_str(raw).map_err(|e| ModelError::checkpoint(path.display(), format!("bad `{key}`: {e}")))
}

impl SequenceModel {
    /// Atomically write weights and metadata to `path`
    pub fn save(&self, path: &Path, info: &CheckpointInfo) -> Result<()> {
        let mut metadata = HashMap::new();
        metadata.insert(SPEC_KEY.to_string(), to_json(path, self.spec())?);
        metadata.insert(CODEC_KEY.to_string(), to_json(path, self.codec())?);
        metadata.insert(INFO_KEY.to_string(), to_json(path, info)?);

        let mut tensors: Vec<(String, Tensor)> = {
            let data = self.varmap().data().lock().map_err(|_| ModelError::Poisoned)?;
            data.iter().map(|(name, var)| (name.clone(), var.as_tensor().clone())).collect()
        };
        tensors.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ModelError::checkpoint(parent.display(), e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        safetensors::tensor::serialize_to_file(tensors, &Some(metadata), &tmp)
            .map_err(|e| ModelError::checkpoint(tmp.display(), e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| ModelError::checkpoint(path.display(), e.to_string()))?;

        tracing::info!(
            path = %path.display(),
            epoch = info.epoch,
            metric = %info.metric,
            value = info.value,
            "Saved checkpoint"
        );
        Ok(())
    }

    /// Rebuild a model from a checkpoint written by [`SequenceModel::save`]
    pub fn load(path: &Path, device: &Device) -> Result<(Self, CheckpointInfo)> {
        let buffer = std::fs::read(path).map_err(|e| ModelError::checkpoint(path.display(), e.to_string()))?;
        let (_, header) = safetensors::SafeTensors::read_metadata(&buffer)
            .map_err(|e| ModelError::checkpoint(path.display(), e.to_string()))?;
        let metadata = header
            .metadata()
            .as_ref()
            .ok_or_else(|| ModelError::checkpoint(path.display(), "no metadata"))?;

        let spec: ModelSpec = from_metadata(path, metadata, SPEC_KEY)?;
        let codec: TargetCodec = from_metadata(path, metadata, CODEC_KEY)?;
        let info: CheckpointInfo = from_metadata(path, metadata, INFO_KEY)?;

        let tensors = candle_core::safetensors::load_buffer(&buffer, device)?;
        let model = Self::new(spec, codec, device, &mut StdRng::seed_from_u64(0))?;
        {
            let data = model.varmap().data().lock().map_err(|_| ModelError::Poisoned)?;
            for (name, var) in data.iter() {
                let tensor = tensors
                    .get(name)
                    .ok_or_else(|| ModelError::checkpoint(path.display(), format!("missing tensor `{name}`")))?;
                if tensor.dims() != var.dims() {
                    return Err(ModelError::checkpoint(
                        path.display(),
                        format!("tensor `{name}` has shape {:?}, expected {:?}", tensor.dims(), var.dims()),
                    ));
                }
                var.set(tensor)?;
            }
            for name in tensors.keys().filter(|n| !data.contains_key(*n)) {
                tracing::warn!(path = %path.display(), tensor = %name, "Ignoring unknown checkpoint tensor");
            }
        }

        tracing::info!(
            path = %path.display(),
            kind = model.spec().kind.as_str(),
            epoch = info.epoch,
            "Loaded checkpoint"
        );
        Ok((model, info))
    }
}
