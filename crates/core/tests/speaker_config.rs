//! Speaker config file round trip through the filesystem

use ptts_core::{Split, SpeakerConfig, SpeakerEntry, StreamStats};

#[test]
fn test_save_and_load_speaker_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speakers.json");

    let mut cfg = SpeakerConfig::default();
    cfg.speakers.insert(
        "72".to_string(),
        SpeakerEntry {
            idx: 0,
            dur_stats: Some(StreamStats::scalar(0.09, 0.04, 0.01, 0.5)),
            aco_stats: None,
            train: vec!["72_001".into(), "72_002".into()],
            valid: vec!["72_100".into()],
        },
    );
    cfg.save(&path).unwrap();

    let loaded = SpeakerConfig::load(&path).unwrap();
    let entry = loaded.get("72").unwrap();
    assert_eq!(entry.utterances(Split::Train).len(), 2);
    assert_eq!(entry.dur_stats.as_ref().unwrap().mean, vec![0.09]);
    assert_eq!(loaded.index_map().unwrap().index_of("72"), Some(0));
}

#[test]
fn test_load_malformed_speaker_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{\"72\": {\"idx\": \"zero\"}}").unwrap();

    let err = SpeakerConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("malformed file"));
}
