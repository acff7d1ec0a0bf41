//! Command-line driver for parametric TTS
//!
//! ```bash
//! # per-speaker statistics into the speaker config
//! ptts --cfg-spk cfg/speakers.json --lab-dir data/lab --aco-dir data/aco stats
//!
//! # train both models
//! ptts --config run.toml --train-dur --train-aco --save-path ckpt
//!
//! # synthesize one label file
//! ptts --synthesize-lab data/lab/utt_001.json \
//!     --dur-model ckpt/dur_model.ckpt --aco-model ckpt/aco_model.ckpt --pf 1.04
//! ```

mod args;
mod train;

use anyhow::{bail, Context, Result};
use candle_core::Device;
use clap::Parser;
use ptts_config::RunConfig;
use ptts_core::{AcousticLayout, SpeakerConfig};
use ptts_data::{compute_stats, Codebook, JsonFeatureSource, TargetKind};
use ptts_pipeline::{SynthesisOptions, Synthesizer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

use args::{Cli, Command};
use train::{train_model, TrainInputs};

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run_stats(run: &RunConfig, output: Option<&Path>) -> Result<()> {
    let mut speakers = SpeakerConfig::load(&run.data.cfg_spk)?;
    let source = JsonFeatureSource::new(&run.data.lab_dir, &run.data.aco_dir);
    let layout = AcousticLayout::new(run.acoustic.cepstral_order);
    let summaries = compute_stats(&source, &mut speakers, layout, run.parser_workers)?;

    let target = output.unwrap_or(run.data.cfg_spk.as_path());
    speakers
        .save(target)
        .with_context(|| format!("saving speaker config to {}", target.display()))?;
    tracing::info!(
        speakers = summaries.len(),
        path = %target.display(),
        "Saved speaker statistics"
    );
    Ok(())
}

fn run_synthesis(run: &RunConfig, device: &Device) -> Result<()> {
    let Some(lab) = run.synthesis.lab.as_deref() else {
        return Ok(());
    };
    let codebook = Codebook::load(&run.data.codebooks)?;
    let synthesizer = Synthesizer::load(codebook, &run.synthesis, device)?;
    let written = synthesizer
        .synthesize_file(
            lab,
            &SynthesisOptions::from(&run.synthesis),
            &run.data.save_path,
            run.synthesis.write_streams,
        )
        .with_context(|| format!("synthesizing {}", lab.display()))?;
    for path in &written {
        tracing::debug!(path = %path.display(), "Written");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut run = RunConfig::load(cli.config.as_deref())?;
    cli.apply(&mut run);
    run.apply_schedule_defaults();
    run.validate()?;

    if let Some(Command::Stats { output }) = &cli.command {
        return run_stats(&run, output.as_deref());
    }

    if !run.train_dur && !run.train_aco && !run.synthesis.enabled() {
        bail!("nothing to do: pass --train-dur, --train-aco, --synthesize-lab or the `stats` subcommand");
    }

    run.write_manifest()?;
    tracing::info!(seed = run.seed, "Seeding random number generator");
    let mut rng = StdRng::seed_from_u64(run.seed);
    let device = ptts_model::select_device(run.cuda)?;

    if run.train_dur || run.train_aco {
        let speakers = SpeakerConfig::load(&run.data.cfg_spk)?;
        let codebook = Codebook::load(&run.data.codebooks)?;
        let source = JsonFeatureSource::new(&run.data.lab_dir, &run.data.aco_dir);
        let inputs = TrainInputs {
            run: &run,
            speakers: &speakers,
            codebook: &codebook,
            source: &source,
            device: &device,
        };
        if run.train_dur {
            train_model(TargetKind::Duration, &inputs, &mut rng)?;
        }
        if run.train_aco {
            train_model(TargetKind::Acoustic, &inputs, &mut rng)?;
        }
    }

    run_synthesis(&run, &device)
}
