//! Epoch loop with validation-driven early stopping
//!
//! ```text
//! Epoch -> TrainSteps -> ValidationPass -> EarlyStoppingCheck -> {Continue | Stop}
//! ```
//!
//! On every improvement of the target metric the model is checkpointed
//! (atomically, overwriting the previous best). Training stops after
//! `patience` consecutive validation passes without improvement or after
//! `max_epochs`.

use ptts_config::LossKind;
use ptts_core::{ConfigError, MetricsSink, NullSink};
use ptts_data::DataLoader;
use ptts_model::{CheckpointInfo, RecurrentState, SequenceModel};
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::Instant;

use crate::error::{Result, TrainError};
use crate::loss::masked_loss;
use crate::metrics::Evaluate;
use crate::optim::TrainOptimizer;
use crate::schedule::{EarlyStopping, PlateauScheduler, Verdict};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_epochs: usize,
    /// Log the training loss every `log_freq` steps
    pub log_freq: usize,
    pub patience: usize,
    /// Metric name driving early stopping and the plateau schedule
    pub eval_target: String,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_name: String,
    /// Carry recurrent state across consecutive batches
    pub stateful: bool,
}

impl EngineConfig {
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_dir.join(&self.checkpoint_name)
    }
}

/// Everything one training epoch needs
pub struct EpochContext<'a> {
    pub model: &'a SequenceModel,
    pub loader: &'a DataLoader,
    pub optimizer: &'a mut TrainOptimizer,
    pub loss: LossKind,
    pub epoch: usize,
    pub log_freq: usize,
    pub stateful: bool,
    pub global_step: &'a mut u64,
    pub sink: &'a mut dyn MetricsSink,
    pub rng: &'a mut StdRng,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    pub steps: usize,
    pub mean_loss: f64,
}

pub type TrainEpochFn = fn(&mut EpochContext<'_>) -> Result<EpochStats>;

/// Default epoch: forward, masked loss, backward, update
///
/// In stateful mode the recurrent state returned by each step is detached and
/// fed to the next one; rows flagged for reset start from zero.
pub fn train_epoch(ctx: &mut EpochContext<'_>) -> Result<EpochStats> {
    let batches = ctx.loader.epoch(ctx.rng);
    let total = batches.total();
    let device = ctx.model.device().clone();
    let q_classes = ctx.model.spec().q_classes;
    let log_freq = ctx.log_freq.max(1);

    let mut state: Option<RecurrentState> = None;
    let mut loss_sum = 0.0;
    let mut steps = 0usize;

    for (i, batch) in batches.enumerate() {
        if batch.steps() == 0 {
            continue;
        }
        let carried = if ctx.stateful { state.take() } else { None };
        let (output, next) = ctx.model.forward(&batch, carried, true)?;
        let targets = batch.targets_tensor(&device)?;
        let mask = batch.mask_tensor(&device)?;
        let loss = masked_loss(ctx.loss, &output, &targets, &mask, q_classes)?;

        *ctx.global_step += 1;
        let value = loss.to_scalar::<f32>()? as f64;
        if !value.is_finite() {
            return Err(TrainError::NonFinite {
                step: *ctx.global_step,
                value,
            });
        }
        ctx.optimizer.backward_step(&loss)?;
        if ctx.stateful {
            state = Some(next.detach());
        }

        loss_sum += value;
        steps += 1;
        if steps % log_freq == 0 {
            tracing::info!(
                epoch = ctx.epoch,
                batch = i + 1,
                batches = total,
                loss = value,
                lr = ctx.optimizer.learning_rate(),
                "Training step"
            );
            ctx.sink.scalar("train/loss", value, *ctx.global_step);
        } else {
            tracing::debug!(epoch = ctx.epoch, batch = i + 1, loss = value, "Training step");
        }
    }

    Ok(EpochStats {
        steps,
        mean_loss: if steps == 0 { 0.0 } else { loss_sum / steps as f64 },
    })
}

/// Result of a full training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_value: Option<f64>,
    pub stopped_early: bool,
    pub checkpoint: PathBuf,
}

pub struct Engine {
    model: SequenceModel,
    train_loader: DataLoader,
    valid_loader: DataLoader,
    optimizer: TrainOptimizer,
    loss: LossKind,
    evaluator: Box<dyn Evaluate>,
    scheduler: Option<PlateauScheduler>,
    sink: Box<dyn MetricsSink>,
    train_fn: TrainEpochFn,
    config: EngineConfig,
    global_step: u64,
}

impl Engine {
    /// Rejects a loss that cannot train the model's output activation
    pub fn new(
        model: SequenceModel,
        train_loader: DataLoader,
        valid_loader: DataLoader,
        optimizer: TrainOptimizer,
        loss: LossKind,
        evaluator: Box<dyn Evaluate>,
        config: EngineConfig,
    ) -> Result<Self> {
        loss.check(model.spec().output_activation)?;
        if config.eval_target.is_empty() {
            return Err(ConfigError::invalid("eval_target", "must not be empty").into());
        }
        Ok(Self {
            model,
            train_loader,
            valid_loader,
            optimizer,
            loss,
            evaluator,
            scheduler: None,
            sink: Box::new(NullSink),
            train_fn: train_epoch,
            config,
            global_step: 0,
        })
    }

    pub fn with_scheduler(mut self, scheduler: PlateauScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_train_fn(mut self, train_fn: TrainEpochFn) -> Self {
        self.train_fn = train_fn;
        self
    }

    pub fn model(&self) -> &SequenceModel {
        &self.model
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn run(&mut self, rng: &mut StdRng) -> Result<TrainReport> {
        let checkpoint = self.config.checkpoint_path();
        let mut stopper = EarlyStopping::new(self.config.patience);
        let mut epochs_run = 0;
        let mut stopped_early = false;
        let kind = self.model.spec().kind.as_str();

        tracing::info!(
            model = kind,
            max_epochs = self.config.max_epochs,
            patience = self.config.patience,
            target = %self.config.eval_target,
            checkpoint = %checkpoint.display(),
            "Starting training"
        );

        for epoch in 1..=self.config.max_epochs {
            let started = Instant::now();
            let stats = {
                let mut ctx = EpochContext {
                    model: &self.model,
                    loader: &self.train_loader,
                    optimizer: &mut self.optimizer,
                    loss: self.loss,
                    epoch,
                    log_freq: self.config.log_freq,
                    stateful: self.config.stateful,
                    global_step: &mut self.global_step,
                    sink: self.sink.as_mut(),
                    rng: &mut *rng,
                };
                (self.train_fn)(&mut ctx)?
            };
            epochs_run = epoch;

            let metrics = self.evaluator.evaluate(&self.model, &self.valid_loader, rng)?;
            let value = *metrics
                .get(&self.config.eval_target)
                .ok_or_else(|| ConfigError::UnknownEvalTarget(self.config.eval_target.clone()))?;
            if !value.is_finite() {
                return Err(TrainError::NonFinite {
                    step: self.global_step,
                    value,
                });
            }
            self.sink.scalars("valid", &metrics, epoch as u64);
            self.sink.scalar("train/epoch_loss", stats.mean_loss, epoch as u64);

            tracing::info!(
                model = kind,
                epoch,
                steps = stats.steps,
                train_loss = stats.mean_loss,
                target = %self.config.eval_target,
                value,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Epoch finished"
            );

            if let Some(scheduler) = self.scheduler.as_mut() {
                let lr = self.optimizer.learning_rate();
                let next = scheduler.step(value, lr);
                if next != lr {
                    self.optimizer.set_learning_rate(next);
                    self.sink.scalar("train/lr", next, epoch as u64);
                }
            }

            match stopper.update(epoch, value) {
                Verdict::Improved => {
                    let info = CheckpointInfo {
                        epoch,
                        metric: self.config.eval_target.clone(),
                        value,
                    };
                    self.model.save(&checkpoint, &info)?;
                }
                Verdict::Waiting(bad) => {
                    tracing::info!(model = kind, epoch, bad, patience = self.config.patience, "No improvement");
                }
                Verdict::Stop => {
                    stopped_early = true;
                    break;
                }
            }
        }
        self.sink.flush();

        let best = stopper.best();
        if let Some((epoch, value)) = best {
            tracing::info!(
                model = kind,
                best_epoch = epoch,
                best_value = value,
                stopped_early,
                "Training finished"
            );
        }
        Ok(TrainReport {
            epochs_run,
            best_epoch: best.map(|(e, _)| e),
            best_value: best.map(|(_, v)| v),
            stopped_early,
            checkpoint,
        })
    }
}
