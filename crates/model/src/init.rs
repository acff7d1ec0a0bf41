//! Seeded parameter initialization
//!
//! Parameters are visited in sorted name order and drawn from one `StdRng`,
//! so equal seeds give equal models.

use candle_core::Tensor;
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{ModelError, Result};
use crate::spec::ModelSpec;

/// Uniform `±1/sqrt(fan)` for projections and LSTMs, identity for layer norm
pub fn seeded_init(varmap: &VarMap, spec: &ModelSpec, rng: &mut StdRng) -> Result<()> {
    let data = varmap.data().lock().map_err(|_| ModelError::Poisoned)?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    for name in names {
        let var = &data[name];
        let shape = var.shape().clone();
        let n = shape.elem_count();

        let values: Vec<f32> = if name.starts_with("emb_norm.") {
            let fill = if name.ends_with("weight") { 1.0 } else { 0.0 };
            vec![fill; n]
        } else {
            let fan = if name.starts_with("emb.") {
                spec.input_dim
            } else {
                spec.rnn_size
            };
            let k = 1.0 / (fan.max(1) as f32).sqrt();
            (0..n).map(|_| rng.gen_range(-k..=k)).collect()
        };
        var.set(&Tensor::from_vec(values, shape, var.device())?)?;
    }
    Ok(())
}
