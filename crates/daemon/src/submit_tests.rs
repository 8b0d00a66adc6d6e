// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cuckoo_core::FakeClock;

fn cwd_and_config() -> (tempfile::TempDir, CuckooCwd, CuckooConfig) {
    let dir = tempfile::tempdir().unwrap();
    let cwd = CuckooCwd::at(dir.path());
    cwd.create_tree().unwrap();
    let mut config = CuckooConfig::default();
    config.submit.min_file_size = 4;
    config.submit.max_file_size = 1024;
    (dir, cwd, config)
}

fn sample(dir: &Path, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join("sample.exe");
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn file_submission_materializes_everything() {
    let (dir, cwd, config) = cwd_and_config();
    let clock = FakeClock::new();
    let source = sample(dir.path(), b"MZ file body");

    let id = submit_file(&cwd, &config, &clock, &source, Settings::default()).unwrap();

    assert!(AnalysisId::is_valid(id.as_str()));
    assert!(cwd.untracked_marker(&id).exists());

    let raw = std::fs::read(cwd.analysis_dir(&id).join("analysis.json")).unwrap();
    let analysis: Analysis = serde_json::from_slice(&raw).unwrap();
    assert_eq!(analysis.id, id);
    let TargetDescriptor::File { sha256, size, filename, .. } = &analysis.target else {
        panic!("expected file target");
    };
    assert_eq!(*size, 12);
    assert_eq!(filename, "sample.exe");

    // The blob landed content-addressed.
    let store = BinaryStore::new(cwd.binaries_dir());
    assert!(store.contains(sha256));
}

#[test]
fn duplicate_submissions_share_one_blob() {
    let (dir, cwd, config) = cwd_and_config();
    let clock = FakeClock::new();
    let source = sample(dir.path(), b"same bytes");

    let a = submit_file(&cwd, &config, &clock, &source, Settings::default()).unwrap();
    let b = submit_file(&cwd, &config, &clock, &source, Settings::default()).unwrap();

    assert_ne!(a, b, "distinct analyses");

    // Exactly one file below binaries/.
    let mut count = 0;
    let mut stack = vec![cwd.binaries_dir()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            if entry.path().is_dir() {
                stack.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    assert_eq!(count, 1);
}

#[test]
fn settings_violations_are_rejected_at_ingest() {
    let (dir, cwd, config) = cwd_and_config();
    let clock = FakeClock::new();
    let source = sample(dir.path(), b"MZ file body");

    let settings = Settings {
        timeout: config.limits.max_timeout + 1,
        ..Settings::default()
    };
    let err = submit_file(&cwd, &config, &clock, &source, settings).unwrap_err();
    assert!(matches!(err, SubmitError::Settings(_)));
    // Nothing was materialized.
    assert!(std::fs::read_dir(cwd.untracked_dir()).unwrap().next().is_none());
}

#[test]
fn file_size_limits_are_enforced() {
    let (dir, cwd, config) = cwd_and_config();
    let clock = FakeClock::new();

    let tiny = sample(dir.path(), b"ab");
    let err = submit_file(&cwd, &config, &clock, &tiny, Settings::default()).unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Binary(BinaryStoreError::TooSmall { .. })
    ));

    let huge = sample(dir.path(), &vec![0u8; 2048]);
    let err = submit_file(&cwd, &config, &clock, &huge, Settings::default()).unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Binary(BinaryStoreError::TooLarge { .. })
    ));
}

#[test]
fn url_submission_validates_scheme() {
    let (_dir, cwd, config) = cwd_and_config();
    let clock = FakeClock::new();

    let id = submit_url(
        &cwd,
        &config,
        &clock,
        "http://example.com/a",
        Settings::default(),
    )
    .unwrap();
    assert!(cwd.untracked_marker(&id).exists());

    let err = submit_url(&cwd, &config, &clock, "ftp://example.com", Settings::default())
        .unwrap_err();
    assert!(matches!(err, SubmitError::InvalidUrl(_)));
}
