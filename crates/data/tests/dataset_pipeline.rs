//! Integration tests: feature files on disk through datasets, samplers and collation

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ptts_config::Normalization;
use ptts_core::{AcousticLayout, ConfigError, DataError, SpeakerConfig, SpeakerEntry, Split};
use ptts_data::{
    collate_indices, compute_stats, frame_count, BatchSampler, Codebook, DatasetError, DatasetOptions,
    JsonFeatureSource, SequenceDataset,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

const LAYOUT: AcousticLayout = AcousticLayout { cepstral_order: 2 };

fn durations(utt: usize) -> Vec<f32> {
    vec![0.05, 0.1, 0.05 + 0.01 * utt as f32, 0.02]
}

fn write_utterance(root: &Path, name: &str, speaker: &str, utt: usize) {
    let phones = ["sil", "a", "e", "sil"];
    let units: Vec<_> = durations(utt)
        .iter()
        .zip(phones)
        .map(|(d, p)| {
            json!({
                "features": {"phone": p, "stress": (utt % 2) as f32},
                "factors": [false, true, false, false, false, false],
                "duration": d,
                "silence": p == "sil",
            })
        })
        .collect();
    let labels = json!({"speaker": speaker, "units": units});
    std::fs::write(root.join("lab").join(format!("{name}.json")), labels.to_string()).unwrap();

    let n: usize = durations(utt).iter().map(|&d| frame_count(d)).sum();
    let frames: Vec<Vec<f32>> = (0..n)
        .map(|t| {
            let x = t as f32 * 0.01 + utt as f32;
            vec![x, x * 0.5, 0.3, 4.5 + x * 0.1, if t % 3 == 0 { 0.0 } else { 1.0 }]
        })
        .collect();
    std::fs::write(
        root.join("aco").join(format!("{name}.json")),
        json!({ "frames": frames }).to_string(),
    )
    .unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    source: JsonFeatureSource,
    codebook: Codebook,
    speakers: SpeakerConfig,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("lab")).unwrap();
    std::fs::create_dir_all(root.join("aco")).unwrap();

    let mut speakers = SpeakerConfig::default();
    let mut utt = 0;
    for (id, idx, n_train) in [("72", 0, 3), ("73", 1, 2)] {
        let mut entry = SpeakerEntry {
            idx,
            ..Default::default()
        };
        for i in 0..n_train + 1 {
            let name = format!("{id}_{i}");
            write_utterance(root, &name, id, utt);
            utt += 1;
            if i < n_train {
                entry.train.push(name);
            } else {
                entry.valid.push(name);
            }
        }
        speakers.speakers.insert(id.to_string(), entry);
    }

    let codebook: Codebook = serde_json::from_value(json!({
        "phone": ["a", "e", "sil"],
        "stress": {"mean": 0.5, "std": 0.5}
    }))
    .unwrap();

    Fixture {
        source: JsonFeatureSource::new(root.join("lab"), root.join("aco")),
        _dir: dir,
        codebook,
        speakers,
    }
}

fn with_stats(fx: &mut Fixture) {
    let summaries = compute_stats(&fx.source, &mut fx.speakers, LAYOUT, 2).unwrap();
    assert_eq!(summaries.len(), 2);
}

#[test]
fn test_duration_dataset_normalization_reverses() {
    let mut fx = fixture();
    with_stats(&mut fx);

    let mut options = DatasetOptions::new(Split::Train);
    options.normalization = Normalization::ZScore;
    options.parser_workers = 2;
    let ds = SequenceDataset::duration(&fx.source, &fx.codebook, &fx.speakers, &options, &mut StdRng::seed_from_u64(1))
        .unwrap();

    assert_eq!(ds.len_by_spk(), BTreeMap::from([(0, 3), (1, 2)]));
    assert_eq!(ds.feature_dim(), 3 + 1 + 6);

    for sample in ds.samples() {
        let utt: usize = if sample.speaker == 0 {
            sample.utterance[3..].parse().unwrap()
        } else {
            4 + sample.utterance[3..].parse::<usize>().unwrap()
        };
        let mut decoded = sample.targets.clone();
        ds.codec().decode_rows(sample.speaker, &mut decoded).unwrap();
        for (d, expected) in decoded.iter().zip(durations(utt)) {
            assert!((d - expected).abs() < 1e-4, "{d} vs {expected}");
        }
    }
}

#[test]
fn test_acoustic_dataset_dimensions() {
    let mut fx = fixture();
    with_stats(&mut fx);

    let mut options = DatasetOptions::new(Split::Valid);
    options.forced_trim = Some(30);
    let ds = SequenceDataset::acoustic(
        &fx.source,
        &fx.codebook,
        &fx.speakers,
        LAYOUT,
        &options,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();

    assert_eq!(ds.len(), 2);
    assert_eq!(ds.feature_dim(), 12);
    assert_eq!(ds.target_dim(), 5);
    assert!(ds.samples().iter().all(|s| s.len() == 30));
    assert_eq!(ds.input_stats().len(), 2);
}

#[test]
fn test_quantization_requires_stats() {
    let fx = fixture();
    let mut options = DatasetOptions::new(Split::Train);
    options.q_classes = Some(8);
    let err = SequenceDataset::duration(&fx.source, &fx.codebook, &fx.speakers, &options, &mut StdRng::seed_from_u64(1))
        .unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Config(ConfigError::QuantizationWithoutStats { q_classes: 8 })
    ));
}

#[test]
fn test_missing_stats_is_data_error() {
    let mut fx = fixture();
    with_stats(&mut fx);
    if let Some(entry) = fx.speakers.speakers.get_mut("73") {
        entry.dur_stats = None;
    }

    let mut options = DatasetOptions::new(Split::Train);
    options.normalization = Normalization::ZScore;
    let err = SequenceDataset::duration(&fx.source, &fx.codebook, &fx.speakers, &options, &mut StdRng::seed_from_u64(1))
        .unwrap_err();
    match err {
        DatasetError::Data(DataError::MissingStats(id)) => assert_eq!(id, "73"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_collation_unpads_to_original() {
    let mut fx = fixture();
    with_stats(&mut fx);
    let options = DatasetOptions::new(Split::Train);
    let ds = SequenceDataset::acoustic(
        &fx.source,
        &fx.codebook,
        &fx.speakers,
        LAYOUT,
        &options,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();

    let sampler = BatchSampler::for_dataset(&ds, 2, false, false);
    for slots in sampler.plan(&ds, &mut StdRng::seed_from_u64(3)) {
        let batch = collate_indices(&ds, &slots);
        for (row, slot) in slots.iter().enumerate() {
            let sample = ds.sample(slot.unwrap());
            assert_eq!(batch.row_features(row), sample.features.as_slice());
            assert_eq!(batch.row_targets(row), sample.targets.as_slice());
            assert_eq!(batch.silence[row], sample.silence);
        }
    }
}

#[test]
fn test_per_speaker_sampler_covers_each_sample_once() {
    let mut fx = fixture();
    with_stats(&mut fx);
    let mut options = DatasetOptions::new(Split::Train);
    options.mulout = true;
    let ds = SequenceDataset::duration(&fx.source, &fx.codebook, &fx.speakers, &options, &mut StdRng::seed_from_u64(1))
        .unwrap();
    let sampler = BatchSampler::for_dataset(&ds, 2, true, false);

    for seed in 0..10 {
        let plan = sampler.plan(&ds, &mut StdRng::seed_from_u64(seed));
        let mut seen = BTreeSet::new();
        for batch in &plan {
            let speakers: BTreeSet<usize> = batch.iter().map(|i| ds.sample(i.unwrap()).speaker).collect();
            assert_eq!(speakers.len(), 1);
            for i in batch {
                assert!(seen.insert(i.unwrap()));
            }
        }
        assert_eq!(seen.len(), ds.len());
    }
}

#[test]
fn test_chunked_dataset_keeps_utterances_together() {
    let mut fx = fixture();
    with_stats(&mut fx);
    let mut options = DatasetOptions::new(Split::Train);
    options.max_seq_len = Some(16);
    let ds = SequenceDataset::acoustic(
        &fx.source,
        &fx.codebook,
        &fx.speakers,
        LAYOUT,
        &options,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();

    let groups = ds.utterance_groups();
    assert_eq!(groups.len(), 5);
    for group in groups {
        let first = ds.sample(group[0]);
        assert!(first.starts_utterance());
        for (k, &i) in group.iter().enumerate() {
            let s = ds.sample(i);
            assert_eq!(s.utterance, first.utterance);
            assert_eq!(s.chunk.index, k);
            assert!(s.len() <= 16);
        }
    }
}

#[test]
fn test_encoded_cache_reused_unless_forced() {
    let mut fx = fixture();
    with_stats(&mut fx);
    let mut options = DatasetOptions::new(Split::Valid);
    let build = |options: &DatasetOptions| {
        SequenceDataset::duration(&fx.source, &fx.codebook, &fx.speakers, options, &mut StdRng::seed_from_u64(1))
    };

    let first = build(&options).unwrap();
    std::fs::remove_file(fx.source.label_path("72_3")).unwrap();

    let cached = build(&options).unwrap();
    assert_eq!(cached.samples(), first.samples());

    options.force_gen = true;
    assert!(matches!(build(&options), Err(DatasetError::Data(DataError::Io(_)))));
}

#[test]
fn test_encoded_cache_rebuilt_when_duration_stats_change() {
    let mut fx = fixture();
    with_stats(&mut fx);
    let options = DatasetOptions::new(Split::Valid);
    let norm_dur_column = fx.codebook.width();
    let build = |fx: &Fixture, options: &DatasetOptions| {
        SequenceDataset::acoustic(&fx.source, &fx.codebook, &fx.speakers, LAYOUT, options, &mut StdRng::seed_from_u64(1))
            .unwrap()
    };
    let first = build(&fx, &options);

    for entry in fx.speakers.speakers.values_mut() {
        if let Some(stats) = entry.dur_stats.as_mut() {
            stats.mean[0] += 1.0;
        }
    }
    let reread = build(&fx, &options);
    let mut forced = options.clone();
    forced.force_gen = true;
    let rebuilt = build(&fx, &forced);

    let column = |ds: &SequenceDataset| ds.sample(0).features[norm_dur_column];
    assert_eq!(column(&reread), column(&rebuilt));
    assert!(column(&reread) < column(&first));
    assert_eq!(reread.input_stats(), rebuilt.input_stats());
}

#[test]
fn test_excluding_every_speaker_fails() {
    let fx = fixture();
    let mut options = DatasetOptions::new(Split::Train);
    options.exclude_speakers = vec!["72".to_string(), "73".to_string()];
    let err = SequenceDataset::duration(&fx.source, &fx.codebook, &fx.speakers, &options, &mut StdRng::seed_from_u64(1))
        .unwrap_err();
    assert!(matches!(err, DatasetError::Config(ConfigError::NoSpeakers { .. })));
}
