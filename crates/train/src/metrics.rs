//! Validation metrics for duration and acoustic models
//!
//! Predictions and targets are compared in physical units: both go through
//! the model's codec before any error is accumulated. Padded steps never
//! count; `nosil` metrics also skip silence steps.
//!
//! | Model | Metrics |
//! |---|---|
//! | duration | `total_dur_rmse`, `total_nosil_dur_rmse`, `<spk>_nosil_dur_rmse`, `*_nosil_dur_acc` when quantized |
//! | acoustic | `total_nosil_aco_mcd`, `total_nosil_f0_rmse`, `total_nosil_uv_err`, `total_nosil_fv_rmse`, `total_nosil_rmse`, per-speaker counterparts, `total_nosil_aco_acc` when quantized |

use candle_core::DType;
use ptts_core::AcousticLayout;
use ptts_data::{Batch, BatchSampler, DataLoader};
use ptts_model::{RecurrentState, SequenceModel};
use rand::rngs::StdRng;
use std::collections::BTreeMap;

use crate::error::Result;

/// `10 / ln(10) * sqrt(2)`
const MCD_SCALE: f64 = 6.141_851_463_713_754;

/// Voiced/unvoiced decision threshold
const UV_THRESHOLD: f32 = 0.5;

/// Computes named validation metrics for a model
pub trait Evaluate {
    fn evaluate(&self, model: &SequenceModel, loader: &DataLoader, rng: &mut StdRng) -> Result<BTreeMap<String, f64>>;
}

/// One unpadded row of a validation batch
pub struct RowView<'a> {
    pub speaker: usize,
    pub silence: &'a [bool],
    /// De-normalized predictions, `len * D`
    pub predicted: &'a [f32],
    /// De-normalized targets, `len * D`
    pub target: &'a [f32],
    /// Predicted and target classes when quantized, `len * D` each
    pub classes: Option<(&'a [f32], &'a [f32])>,
}

/// Run the model over one validation epoch, visiting every non-empty row
///
/// Recurrent state is carried between batches when the loader deals lanes.
pub fn for_each_row(
    model: &SequenceModel,
    loader: &DataLoader,
    rng: &mut StdRng,
    mut visit: impl FnMut(RowView<'_>) -> Result<()>,
) -> Result<()> {
    let stateful = matches!(loader.sampler(), BatchSampler::Lanes(_));
    let quantized = model.spec().q_classes.is_some();
    let mut state: Option<RecurrentState> = None;

    for batch in loader.epoch(rng) {
        if batch.steps() == 0 {
            continue;
        }
        let carried = if stateful { state.take() } else { None };
        let (output, next) = model.forward(&batch, carried, false)?;
        if stateful {
            state = Some(next);
        }

        let predicted = model.decode(&batch, &output)?;
        let predicted_classes = if quantized {
            Some(unpadded(&batch, model.point_estimates(&output)?.to_dtype(DType::F32)?.to_vec3()?))
        } else {
            None
        };

        for (b, row) in predicted.iter().enumerate() {
            if batch.lengths[b] == 0 {
                continue;
            }
            let speaker = batch.speakers[b];
            let raw_target = batch.row_targets(b);
            let mut target = raw_target.to_vec();
            model.codec().decode_rows(speaker, &mut target)?;
            visit(RowView {
                speaker,
                silence: &batch.silence[b],
                predicted: row,
                target: &target,
                classes: predicted_classes.as_ref().map(|p| (p[b].as_slice(), raw_target)),
            })?;
        }
    }
    Ok(())
}

fn unpadded(batch: &Batch, rows: Vec<Vec<Vec<f32>>>) -> Vec<Vec<f32>> {
    rows.into_iter()
        .enumerate()
        .map(|(b, row)| row.into_iter().take(batch.lengths[b]).flatten().collect())
        .collect()
}

/// Running mean of squared errors
#[derive(Debug, Clone, Copy, Default)]
pub struct Rmse {
    sum_sq: f64,
    count: usize,
}

impl Rmse {
    pub fn add(&mut self, predicted: f32, target: f32) {
        let diff = (predicted - target) as f64;
        self.sum_sq += diff * diff;
        self.count += 1;
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_sq / self.count as f64).sqrt()
        }
    }
}

/// Running mean
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

fn speaker_name(model: &SequenceModel, speaker: usize) -> String {
    model
        .spec()
        .speakers
        .id_of(speaker)
        .map_or_else(|| speaker.to_string(), str::to_string)
}

#[derive(Debug, Default)]
struct DurationTally {
    all: Rmse,
    nosil: Rmse,
    accuracy: Mean,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DurationEvaluator;

impl Evaluate for DurationEvaluator {
    fn evaluate(&self, model: &SequenceModel, loader: &DataLoader, rng: &mut StdRng) -> Result<BTreeMap<String, f64>> {
        let mut total = DurationTally::default();
        let mut per_speaker: BTreeMap<usize, DurationTally> = BTreeMap::new();

        for_each_row(model, loader, rng, |row| {
            let spk = per_speaker.entry(row.speaker).or_default();
            for (t, (&p, &y)) in row.predicted.iter().zip(row.target).enumerate() {
                total.all.add(p, y);
                if row.silence[t] {
                    continue;
                }
                total.nosil.add(p, y);
                spk.nosil.add(p, y);
                if let Some((pc, yc)) = row.classes {
                    let hit = if pc[t] == yc[t] { 1.0 } else { 0.0 };
                    total.accuracy.add(hit);
                    spk.accuracy.add(hit);
                }
            }
            Ok(())
        })?;

        let quantized = model.spec().q_classes.is_some();
        let mut metrics = BTreeMap::new();
        metrics.insert("total_dur_rmse".to_string(), total.all.value());
        metrics.insert("total_nosil_dur_rmse".to_string(), total.nosil.value());
        if quantized {
            metrics.insert("total_nosil_dur_acc".to_string(), total.accuracy.value());
        }
        for (speaker, tally) in &per_speaker {
            let name = speaker_name(model, *speaker);
            metrics.insert(format!("{name}_nosil_dur_rmse"), tally.nosil.value());
            if quantized {
                metrics.insert(format!("{name}_nosil_dur_acc"), tally.accuracy.value());
            }
        }
        Ok(metrics)
    }
}

#[derive(Debug, Default)]
struct AcousticTally {
    mcd: Mean,
    f0: Rmse,
    uv: Mean,
    fv: Rmse,
    all: Rmse,
    accuracy: Mean,
}

impl AcousticTally {
    fn add_frame(&mut self, layout: &AcousticLayout, p: &[f32], y: &[f32]) {
        let cepstral: f64 = layout
            .cepstrum()
            .skip(1)
            .map(|d| {
                let diff = (p[d] - y[d]) as f64;
                diff * diff
            })
            .sum();
        self.mcd.add(MCD_SCALE * cepstral.sqrt());

        let voiced_target = y[layout.uv()] > UV_THRESHOLD;
        let voiced_pred = p[layout.uv()] > UV_THRESHOLD;
        self.uv.add(if voiced_target == voiced_pred { 0.0 } else { 1.0 });
        if voiced_target {
            self.f0.add(p[layout.lf0()].exp(), y[layout.lf0()].exp());
        }
        self.fv.add(p[layout.fv()], y[layout.fv()]);
        for (&pd, &yd) in p.iter().zip(y) {
            self.all.add(pd, yd);
        }
    }

    fn add_classes(&mut self, pc: &[f32], yc: &[f32]) {
        for (a, b) in pc.iter().zip(yc) {
            self.accuracy.add(if a == b { 1.0 } else { 0.0 });
        }
    }

    fn report(&self, prefix: &str, quantized: bool, metrics: &mut BTreeMap<String, f64>) {
        metrics.insert(format!("{prefix}_nosil_aco_mcd"), self.mcd.value());
        metrics.insert(format!("{prefix}_nosil_f0_rmse"), self.f0.value());
        metrics.insert(format!("{prefix}_nosil_uv_err"), self.uv.value());
        metrics.insert(format!("{prefix}_nosil_fv_rmse"), self.fv.value());
        metrics.insert(format!("{prefix}_nosil_rmse"), self.all.value());
        if quantized {
            metrics.insert(format!("{prefix}_nosil_aco_acc"), self.accuracy.value());
        }
    }
}

/// MCD over cepstral coefficients 1.., F0 RMSE in Hz over target-voiced frames
#[derive(Debug, Clone, Copy, Default)]
pub struct AcousticEvaluator;

impl Evaluate for AcousticEvaluator {
    fn evaluate(&self, model: &SequenceModel, loader: &DataLoader, rng: &mut StdRng) -> Result<BTreeMap<String, f64>> {
        let layout = model.spec().acoustic_layout()?;
        let width = layout.width();
        let mut total = AcousticTally::default();
        let mut per_speaker: BTreeMap<usize, AcousticTally> = BTreeMap::new();

        for_each_row(model, loader, rng, |row| {
            let spk = per_speaker.entry(row.speaker).or_default();
            let frames = row.predicted.chunks(width).zip(row.target.chunks(width));
            for (t, (p, y)) in frames.enumerate() {
                if row.silence[t] {
                    continue;
                }
                total.add_frame(&layout, p, y);
                spk.add_frame(&layout, p, y);
                if let Some((pc, yc)) = row.classes {
                    let span = t * width..(t + 1) * width;
                    total.add_classes(&pc[span.clone()], &yc[span.clone()]);
                    spk.add_classes(&pc[span.clone()], &yc[span]);
                }
            }
            Ok(())
        })?;

        let quantized = model.spec().q_classes.is_some();
        let mut metrics = BTreeMap::new();
        total.report("total", quantized, &mut metrics);
        for (speaker, tally) in &per_speaker {
            tally.report(&speaker_name(model, *speaker), quantized, &mut metrics);
        }
        Ok(metrics)
    }
}
