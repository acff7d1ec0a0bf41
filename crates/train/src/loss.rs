//! Length-masked training losses
//!
//! Every loss averages over real steps only: `mask` is `(B, T)` with 1.0 on
//! real steps and 0.0 on padding.

use candle_core::{DType, Tensor};
use ptts_config::LossKind;

use crate::error::Result;

/// Probability clamp for binary cross-entropy
const BCE_EPS: f64 = 1e-7;

/// Masked mean loss
///
/// `output` is `(B, T, W)`; `targets` is `(B, T, D)`. For [`LossKind::Nll`]
/// `W = D * q_classes` holds log-probabilities and targets are class indices;
/// otherwise `W = D`.
pub fn masked_loss(
    kind: LossKind,
    output: &Tensor,
    targets: &Tensor,
    mask: &Tensor,
    q_classes: Option<usize>,
) -> Result<Tensor> {
    let (b, t, d) = targets.dims3()?;
    let real_steps = mask.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64;
    let norm = 1.0 / (real_steps * d as f64).max(1.0);
    let weights = mask.unsqueeze(2)?;

    let elementwise = match kind {
        LossKind::Mse => output.sub(targets)?.sqr()?,
        LossKind::Mae => output.sub(targets)?.abs()?,
        LossKind::Bce => {
            let p = output.clamp(BCE_EPS, 1.0 - BCE_EPS)?;
            let pos = targets.mul(&p.log()?)?;
            let neg = targets.affine(-1.0, 1.0)?.mul(&p.affine(-1.0, 1.0)?.log()?)?;
            pos.add(&neg)?.neg()?
        }
        LossKind::Nll => {
            let q = q_classes.unwrap_or(output.dim(2)? / d.max(1));
            let log_probs = output.reshape((b * t * d, q))?;
            let classes = targets
                .clamp(0.0, (q - 1) as f64)?
                .reshape((b * t * d, 1))?
                .to_dtype(DType::U32)?;
            log_probs.gather(&classes, 1)?.reshape((b, t, d))?.neg()?
        }
    };

    Ok(elementwise.broadcast_mul(&weights)?.sum_all()?.affine(norm, 0.0)?)
}
