//! Synthesis from saved checkpoints

use candle_core::Device;
use ptts_config::{EmbActivation, Normalization, OutputActivation, SynthesisConfig};
use ptts_core::{ConfigError, DataError, LabelSequence, LabelUnit, LabelValue, SpeakerIndexMap, StreamStats};
use ptts_data::{Codebook, TargetCodec, TargetKind};
use ptts_model::{CheckpointInfo, ModelSpec, SequenceModel};
use ptts_pipeline::{SynthesisError, SynthesisOptions, Synthesizer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CEPSTRAL_ORDER: usize = 2;

fn codebook() -> Codebook {
    serde_json::from_str(r#"{"phone": ["a", "sil"]}"#).unwrap()
}

fn unit(phone: &str, duration: f32) -> LabelUnit {
    LabelUnit {
        features: BTreeMap::from([("phone".to_string(), LabelValue::category(phone))]),
        factors: vec![false, true, false, false, true, false],
        duration,
        silence: phone == "sil",
    }
}

fn labels(speaker: Option<&str>) -> LabelSequence {
    LabelSequence {
        speaker: speaker.map(str::to_string),
        units: vec![unit("sil", 0.01), unit("a", 0.02), unit("a", 0.015)],
    }
}

fn speakers() -> SpeakerIndexMap {
    SpeakerIndexMap::from_pairs(vec![("72".to_string(), 0), ("73".to_string(), 1)]).unwrap()
}

fn dur_stats() -> BTreeMap<usize, StreamStats> {
    BTreeMap::from([
        (0, StreamStats::scalar(0.05, 0.02, 0.0, 0.2)),
        (1, StreamStats::scalar(0.06, 0.03, 0.0, 0.3)),
    ])
}

fn spec(kind: TargetKind, input_dim: usize, target_dim: usize) -> ModelSpec {
    ModelSpec {
        kind,
        input_dim,
        target_dim,
        emb_size: 6,
        rnn_size: 5,
        rnn_layers: 1,
        dropout: 0.0,
        emb_activation: EmbActivation::Relu,
        emb_norm: false,
        output_activation: OutputActivation::Linear,
        q_classes: None,
        mulout: false,
        speakers: speakers(),
        input_stats: BTreeMap::new(),
    }
}

/// Writes `dur.ckpt` and `aco.ckpt` into `dir`
fn checkpoints(dir: &Path) -> (PathBuf, PathBuf) {
    let width = codebook().width();
    let info = CheckpointInfo {
        epoch: 1,
        metric: "m".to_string(),
        value: 0.0,
    };

    let dur_codec = TargetCodec::new(Normalization::ZScore, None, dur_stats(), 1).unwrap();
    let dur = SequenceModel::new(
        spec(TargetKind::Duration, width, 1),
        dur_codec,
        &Device::Cpu,
        &mut StdRng::seed_from_u64(11),
    )
    .unwrap();
    let dur_path = dir.join("dur.ckpt");
    dur.save(&dur_path, &info).unwrap();

    let mut aco_spec = spec(TargetKind::Acoustic, width + 2, CEPSTRAL_ORDER + 3);
    aco_spec.input_stats = dur_stats();
    let aco = SequenceModel::new(
        aco_spec,
        TargetCodec::identity(CEPSTRAL_ORDER + 3),
        &Device::Cpu,
        &mut StdRng::seed_from_u64(12),
    )
    .unwrap();
    let aco_path = dir.join("aco.ckpt");
    aco.save(&aco_path, &info).unwrap();

    (dur_path, aco_path)
}

fn synth_config(dur: &Path, aco: &Path, force_dur: bool) -> SynthesisConfig {
    SynthesisConfig {
        lab: None,
        dur_model: Some(dur.to_path_buf()),
        aco_model: Some(aco.to_path_buf()),
        force_dur,
        pf: 1.0,
        speaker: None,
        write_streams: true,
    }
}

#[test]
fn test_repeated_synthesis_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (dur, aco) = checkpoints(dir.path());
    let lab = dir.path().join("utt_001.json");
    std::fs::write(&lab, serde_json::to_string(&labels(Some("72"))).unwrap()).unwrap();

    let mut outputs = Vec::new();
    for run in 0..2 {
        let synth = Synthesizer::load(codebook(), &synth_config(&dur, &aco, false), &Device::Cpu).unwrap();
        let out_dir = dir.path().join(format!("run{run}"));
        let written = synth
            .synthesize_file(&lab, &SynthesisOptions::default(), &out_dir, true)
            .unwrap();
        assert_eq!(written.len(), 6);
        assert!(out_dir.join("utt_001.synth.json").exists());
        outputs.push(
            ["synth.json", "cc", "fv", "lf0", "uv", "dur"]
                .iter()
                .map(|ext| std::fs::read(out_dir.join(format!("utt_001.{ext}"))).unwrap())
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_force_dur_uses_label_durations() {
    let dir = tempfile::tempdir().unwrap();
    let (_, aco) = checkpoints(dir.path());
    // the duration checkpoint is never opened with force_dur
    let missing = dir.path().join("absent.ckpt");
    let synth = Synthesizer::load(codebook(), &synth_config(&missing, &aco, true), &Device::Cpu).unwrap();

    let options = SynthesisOptions {
        force_dur: true,
        ..Default::default()
    };
    let out = synth.synthesize(&labels(Some("73")), &options).unwrap();
    assert_eq!(out.speaker, "73");
    assert_eq!(out.durations, vec![0.01, 0.02, 0.015]);
    // 2 + 4 + 3 frames at a 5 ms shift
    assert_eq!(out.frames.len(), 9);
    assert!(out.frames.iter().all(|f| f.len() == CEPSTRAL_ORDER + 3));
}

#[test]
fn test_post_filter_scales_cepstrum_above_c0() {
    let dir = tempfile::tempdir().unwrap();
    let (dur, aco) = checkpoints(dir.path());
    let synth = Synthesizer::load(codebook(), &synth_config(&dur, &aco, false), &Device::Cpu).unwrap();

    let plain = synth.synthesize(&labels(Some("72")), &SynthesisOptions::default()).unwrap();
    let boosted = synth
        .synthesize(
            &labels(Some("72")),
            &SynthesisOptions {
                pf: 1.5,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(plain.durations, boosted.durations);
    for (p, b) in plain.frames.iter().zip(&boosted.frames) {
        assert_eq!(p[0], b[0]);
        assert!((p[1] * 1.5 - b[1]).abs() < 1e-6);
        assert_eq!(p[CEPSTRAL_ORDER..], b[CEPSTRAL_ORDER..]);
    }
}

#[test]
fn test_speaker_selection() {
    let dir = tempfile::tempdir().unwrap();
    let (dur, aco) = checkpoints(dir.path());
    let synth = Synthesizer::load(codebook(), &synth_config(&dur, &aco, false), &Device::Cpu).unwrap();

    let explicit = SynthesisOptions {
        speaker: Some("73".to_string()),
        ..Default::default()
    };
    assert_eq!(synth.synthesize(&labels(Some("72")), &explicit).unwrap().speaker, "73");

    let err = synth
        .synthesize(&labels(None), &SynthesisOptions::default())
        .unwrap_err();
    assert!(matches!(err, SynthesisError::NoSpeaker));

    let err = synth
        .synthesize(&labels(Some("99")), &SynthesisOptions::default())
        .unwrap_err();
    assert!(matches!(err, SynthesisError::Data(DataError::UnknownSpeaker(ref s)) if s == "99"));
}

#[test]
fn test_load_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (dur, aco) = checkpoints(dir.path());

    let mut config = synth_config(&dur, &aco, false);
    config.aco_model = None;
    let err = Synthesizer::load(codebook(), &config, &Device::Cpu).err().unwrap();
    assert!(matches!(err, SynthesisError::Config(ConfigError::MissingModelPath("aco_model"))));

    let swapped = synth_config(&aco, &dur, false);
    let err = Synthesizer::load(codebook(), &swapped, &Device::Cpu).err().unwrap();
    assert!(matches!(err, SynthesisError::WrongKind { .. }));

    let wider: Codebook = serde_json::from_str(r#"{"phone": ["a", "e", "sil"]}"#).unwrap();
    let err = Synthesizer::load(wider, &synth_config(&dur, &aco, false), &Device::Cpu)
        .err()
        .unwrap();
    assert!(matches!(err, SynthesisError::Data(DataError::DimensionMismatch { .. })));
}
