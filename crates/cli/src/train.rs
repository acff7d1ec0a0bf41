//! Wiring one training run: datasets, model, optimizer and engine

use anyhow::Context;
use candle_core::Device;
use ptts_config::constants::files;
use ptts_config::{ModelConfig, RunConfig};
use ptts_core::{AcousticLayout, FeatureSource, SpeakerConfig, Split};
use ptts_data::{BatchSampler, Codebook, DataLoader, DatasetOptions, SequenceDataset, TargetKind};
use ptts_model::{ModelSpec, SequenceModel};
use ptts_train::{
    AcousticEvaluator, DurationEvaluator, Engine, EngineConfig, Evaluate, JsonlSink, PlateauScheduler, TrainOptimizer,
    TrainReport,
};
use rand::rngs::StdRng;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything a training run reads
pub struct TrainInputs<'a> {
    pub run: &'a RunConfig,
    pub speakers: &'a SpeakerConfig,
    pub codebook: &'a Codebook,
    pub source: &'a dyn FeatureSource,
    pub device: &'a Device,
}

fn dataset_options(run: &RunConfig, model: &ModelConfig, split: Split) -> DatasetOptions {
    let mut options = DatasetOptions::new(split);
    options.force_gen = run.force_gen;
    options.normalization = model.normalization();
    options.max_samples = model.max_samples;
    options.max_seq_len = model.max_seq_len;
    options.q_classes = model.q_classes;
    options.mulout = model.mulout;
    options.parser_workers = run.parser_workers;
    match split {
        Split::Train => {
            options.exclude_speakers = run.exclude_train_spks.clone();
            options.min_speaker_samples = model.min_speaker_samples;
            options.forced_trim = model.train_forced_trim;
        }
        Split::Valid => {
            options.exclude_speakers = run.exclude_eval_spks.clone();
            options.forced_trim = model.valid_forced_trim;
        }
    }
    options
}

fn build_dataset(
    kind: TargetKind,
    inputs: &TrainInputs<'_>,
    model: &ModelConfig,
    options: &DatasetOptions,
    rng: &mut StdRng,
) -> anyhow::Result<SequenceDataset> {
    let dataset = match kind {
        TargetKind::Duration => {
            SequenceDataset::duration(inputs.source, inputs.codebook, inputs.speakers, options, rng)
        }
        TargetKind::Acoustic => SequenceDataset::acoustic(
            inputs.source,
            inputs.codebook,
            inputs.speakers,
            AcousticLayout::new(model.cepstral_order),
            options,
            rng,
        ),
    };
    dataset.with_context(|| format!("building {} {} dataset", kind.as_str(), options.split))
}

/// Train the duration or acoustic model and keep its best checkpoint
pub fn train_model(kind: TargetKind, inputs: &TrainInputs<'_>, rng: &mut StdRng) -> anyhow::Result<TrainReport> {
    let run = inputs.run;
    let (model_config, checkpoint_name, evaluator): (&ModelConfig, &str, Box<dyn Evaluate>) = match kind {
        TargetKind::Duration => (
            &run.duration,
            files::DURATION_CHECKPOINT,
            Box::new(DurationEvaluator) as Box<dyn Evaluate>,
        ),
        TargetKind::Acoustic => (
            &run.acoustic,
            files::ACOUSTIC_CHECKPOINT,
            Box::new(AcousticEvaluator) as Box<dyn Evaluate>,
        ),
    };
    let stateful = model_config.stateful();

    let train_set = build_dataset(kind, inputs, model_config, &dataset_options(run, model_config, Split::Train), rng)?;
    if train_set.is_empty() {
        anyhow::bail!("{} training split is empty", kind.as_str());
    }

    let mut valid_options = dataset_options(run, model_config, Split::Valid);
    valid_options.allowed_speakers = Some(train_set.speakers().indices().collect::<BTreeSet<_>>());
    let valid_set = build_dataset(kind, inputs, model_config, &valid_options, rng)?;
    if valid_set.is_empty() {
        anyhow::bail!("{} validation split is empty", kind.as_str());
    }

    let spec = ModelSpec::for_dataset(model_config, &train_set);
    let model = SequenceModel::new(spec, train_set.codec().clone(), inputs.device, rng)?;
    tracing::info!(
        model = kind.as_str(),
        inputs = model.spec().input_dim,
        targets = model.spec().target_dim,
        speakers = model.spec().speakers.len(),
        mulout = model.spec().mulout,
        stateful,
        "Built model"
    );
    let optimizer = TrainOptimizer::new(model_config.optim, model.vars(), model_config.lr)?;

    let train_sampler = BatchSampler::for_dataset(&train_set, run.batch_size, model_config.mulout, stateful);
    let valid_sampler = BatchSampler::for_dataset(&valid_set, run.batch_size, model_config.mulout, stateful);
    let train_loader = DataLoader::new(Arc::new(train_set), train_sampler, run.loader_workers);
    let valid_loader = DataLoader::new(Arc::new(valid_set), valid_sampler, run.loader_workers);

    let engine_config = EngineConfig {
        max_epochs: run.epoch,
        log_freq: run.log_freq,
        patience: run.patience,
        eval_target: model_config.eval_target.clone(),
        checkpoint_dir: run.data.save_path.clone(),
        checkpoint_name: checkpoint_name.to_string(),
        stateful,
    };
    let sink = JsonlSink::create(&run.data.save_path.join(kind.as_str()))?;

    let mut engine = Engine::new(
        model,
        train_loader,
        valid_loader,
        optimizer,
        model_config.effective_loss(),
        evaluator,
        engine_config,
    )?
    .with_sink(Box::new(sink));
    if let Some(plateau) = &model_config.plateau {
        engine = engine.with_scheduler(PlateauScheduler::new(plateau));
    }

    let report = engine.run(rng)?;
    tracing::info!(
        model = kind.as_str(),
        epochs = report.epochs_run,
        best_epoch = ?report.best_epoch,
        best_value = ?report.best_value,
        stopped_early = report.stopped_early,
        checkpoint = %report.checkpoint.display(),
        "Training finished"
    );
    Ok(report)
}
