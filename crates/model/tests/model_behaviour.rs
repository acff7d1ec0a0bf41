//! Integration tests for the sequence model: stateful chunking, mulout heads, checkpoints

use std::collections::BTreeMap;

use candle_core::{DType, Device, Tensor};
use ptts_config::{EmbActivation, OutputActivation};
use ptts_core::SpeakerIndexMap;
use ptts_data::{TargetCodec, TargetKind};
use ptts_model::{CheckpointInfo, ModelError, ModelSpec, SequenceModel};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn spec(mulout: bool) -> ModelSpec {
    ModelSpec {
        kind: TargetKind::Acoustic,
        input_dim: 4,
        target_dim: 5,
        emb_size: 6,
        rnn_size: 7,
        rnn_layers: 2,
        dropout: 0.5,
        emb_activation: EmbActivation::Relu,
        emb_norm: false,
        output_activation: OutputActivation::Linear,
        q_classes: None,
        mulout,
        speakers: SpeakerIndexMap::from_pairs(vec![("72".to_string(), 0), ("73".to_string(), 2)]).unwrap(),
        input_stats: BTreeMap::new(),
    }
}

fn model(mulout: bool) -> SequenceModel {
    SequenceModel::new(spec(mulout), TargetCodec::identity(5), &Device::Cpu, &mut StdRng::seed_from_u64(42)).unwrap()
}

fn input(steps: usize) -> Tensor {
    let values: Vec<f32> = (0..steps * 4).map(|v| ((v * 7 % 11) as f32 - 5.0) / 5.0).collect();
    Tensor::from_vec(values, (1, steps, 4), &Device::Cpu).unwrap()
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}

#[test]
fn test_chunked_forward_matches_unchunked() {
    let m = model(false);
    let x = input(9);
    let (full, _) = m.forward_tensor(&x, &[9], &[0], &[true], None, false).unwrap();

    let mut state = None;
    let mut pieces = Vec::new();
    for (start, len) in [(0, 4), (4, 4), (8, 1)] {
        let chunk = x.narrow(1, start, len).unwrap();
        let (out, next) = m
            .forward_tensor(&chunk, &[len], &[0], &[start == 0], state.take(), false)
            .unwrap();
        pieces.push(out);
        state = Some(next.detach());
    }
    let chunked = Tensor::cat(&pieces, 1).unwrap();

    assert_eq!(chunked.dims(), full.dims());
    assert!(max_abs_diff(&chunked, &full) < 1e-5);
}

#[test]
fn test_reset_discards_carried_state() {
    let m = model(false);
    let x = input(3);
    let (fresh, _) = m.forward_tensor(&x, &[3], &[0], &[true], None, false).unwrap();
    let (_, warm) = m.forward_tensor(&input(5), &[5], &[0], &[true], None, false).unwrap();
    let (reset, _) = m.forward_tensor(&x, &[3], &[0], &[true], Some(warm), false).unwrap();
    assert!(max_abs_diff(&fresh, &reset) < 1e-6);
}

#[test]
fn test_mulout_dispatch_uses_own_head() {
    let m = model(true);
    let x = input(4);
    let (before_72, _) = m.forward_tensor(&x, &[4], &[0], &[true], None, false).unwrap();
    let (before_73, _) = m.forward_tensor(&x, &[4], &[2], &[true], None, false).unwrap();

    {
        let data = m.varmap().data().lock().unwrap();
        let head = &data["heads.0.weight"];
        head.set(&Tensor::zeros(head.dims(), DType::F32, &Device::Cpu).unwrap()).unwrap();
    }

    let (after_72, _) = m.forward_tensor(&x, &[4], &[0], &[true], None, false).unwrap();
    let (after_73, _) = m.forward_tensor(&x, &[4], &[2], &[true], None, false).unwrap();
    assert!(max_abs_diff(&before_72, &after_72) > 0.0);
    assert_eq!(max_abs_diff(&before_73, &after_73), 0.0);
}

#[test]
fn test_mulout_rejects_mixed_and_unknown_speakers() {
    let m = model(true);
    let x = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
    let err = m
        .forward_tensor(&x, &[3, 3], &[0, 2], &[true, true], None, false)
        .unwrap_err();
    assert!(matches!(err, ModelError::MixedSpeakers(_)));

    let err = m
        .forward_tensor(&x, &[3, 3], &[1, 1], &[true, true], None, false)
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownSpeakerHead(1)));
}

#[test]
fn test_checkpoint_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("aco_model.ckpt");
    let m = model(true);
    let info = CheckpointInfo {
        epoch: 3,
        metric: "total_nosil_aco_mcd".to_string(),
        value: 4.25,
    };
    m.save(&path, &info).unwrap();
    assert!(!path.with_extension("tmp").exists());

    let (loaded, loaded_info) = SequenceModel::load(&path, &Device::Cpu).unwrap();
    assert_eq!(loaded_info, info);
    assert_eq!(loaded.spec(), m.spec());
    assert_eq!(loaded.codec(), m.codec());

    let x = input(6);
    let (a, _) = m.forward_tensor(&x, &[6], &[2], &[true], None, false).unwrap();
    let (b, _) = loaded.forward_tensor(&x, &[6], &[2], &[true], None, false).unwrap();
    assert_eq!(max_abs_diff(&a, &b), 0.0);
}

#[test]
fn test_load_missing_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = SequenceModel::load(&dir.path().join("absent.ckpt"), &Device::Cpu).err().unwrap();
    assert!(matches!(err, ModelError::Checkpoint { .. }));
}
