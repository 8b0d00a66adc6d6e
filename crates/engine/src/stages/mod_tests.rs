// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cuckoo_core::test_support;
use cuckoo_core::{Identification, PostReport};
use std::sync::atomic::{AtomicU32, Ordering};

/// Runner returning a fixed report, counting invocations, optionally slow.
struct ScriptedRunner {
    report: StageReport,
    runs: AtomicU32,
    delay: Duration,
}

impl ScriptedRunner {
    fn new(report: StageReport) -> Arc<Self> {
        Arc::new(Self {
            report,
            runs: AtomicU32::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow(report: StageReport, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            report,
            runs: AtomicU32::new(0),
            delay,
        })
    }
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn run(&self, _request: &StageRequest) -> Result<StageReport, Fault> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.report.clone())
    }
}

fn identification_report() -> StageReport {
    StageReport::Identification(Identification {
        file_type: "pe".to_string(),
        sha256: None,
        media_type: None,
    })
}

fn request(dir: &std::path::Path, stage: Stage) -> StageRequest {
    StageRequest {
        stage,
        analysis: test_support::analysis("20260801-AAAAAA"),
        task_id: None,
        task: None,
        analysis_dir: dir.to_path_buf(),
        task_dir: None,
        binary_path: None,
    }
}

fn pools_with(
    identification: Arc<dyn StageRunner>,
    settings: StageSettings,
) -> (StagePools, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(16);
    let pre = ScriptedRunner::new(identification_report());
    let post = ScriptedRunner::new(StageReport::Post(PostReport {
        score: 0,
        families: vec![],
    }));
    (
        StagePools::new(settings, identification, pre, post, tx),
        rx,
    )
}

#[tokio::test]
async fn dispatch_reports_stage_complete_and_persists_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new(identification_report());
    let (pools, mut rx) = pools_with(runner.clone(), StageSettings::default());

    pools.dispatch(request(dir.path(), Stage::Identification));

    let event = rx.recv().await.unwrap();
    let Event::StageComplete { stage, outcome, .. } = event else {
        panic!("unexpected event");
    };
    assert_eq!(stage, Stage::Identification);
    assert!(matches!(outcome, StageOutcome::Completed { .. }));
    assert!(dir.path().join("identification.json").exists());
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_dispatch_returns_cached_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new(identification_report());
    let (pools, mut rx) = pools_with(runner.clone(), StageSettings::default());

    pools.dispatch(request(dir.path(), Stage::Identification));
    rx.recv().await.unwrap();

    pools.dispatch(request(dir.path(), Stage::Identification));
    let event = rx.recv().await.unwrap();
    let Event::StageComplete { outcome, .. } = event else {
        panic!("unexpected event");
    };
    assert!(matches!(outcome, StageOutcome::Completed { .. }));
    // Computed once; the second run came from the artifact.
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stage_timeout_fails_with_stage_timeout_kind() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::slow(identification_report(), Duration::from_secs(60));
    let settings = StageSettings {
        identification_timeout: Duration::from_millis(50),
        ..StageSettings::default()
    };
    let (pools, mut rx) = pools_with(runner, settings);

    pools.dispatch(request(dir.path(), Stage::Identification));

    let event = rx.recv().await.unwrap();
    let Event::StageComplete { outcome, .. } = event else {
        panic!("unexpected event");
    };
    let StageOutcome::Failed { fault } = outcome else {
        panic!("expected failure");
    };
    assert_eq!(fault.kind, ErrorKind::StageTimeout);
    assert!(!dir.path().join("identification.json").exists());
}

#[tokio::test]
async fn pool_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::slow(identification_report(), Duration::from_millis(100));
    let settings = StageSettings {
        identification_workers: 1,
        ..StageSettings::default()
    };
    let (pools, mut rx) = pools_with(runner.clone(), settings);

    // Two jobs against one worker: both finish, strictly serialized.
    // Distinct directories so artifact caching does not short-circuit.
    let dir_b = tempfile::tempdir().unwrap();
    let start = std::time::Instant::now();
    pools.dispatch(request(dir.path(), Stage::Identification));
    pools.dispatch(request(dir_b.path(), Stage::Identification));
    rx.recv().await.unwrap();
    rx.recv().await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
}
