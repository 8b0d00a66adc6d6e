// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The analysis pipeline end to end: submission through FINISHED.

use crate::prelude::*;
use cuckoo_core::{AnalysisState, Settings, TaskId, TaskState};

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_single_platform_file() {
    let dir = tempfile::tempdir().unwrap();
    let agent_port = spawn_fake_agent().await;
    let cwd = write_cwd(dir.path(), agent_port, false);

    let id = submit_sample(
        &cwd,
        dir.path(),
        4096,
        Settings {
            timeout: 120,
            priority: 1,
            ..Settings::default()
        },
    );

    let result = boot(cwd).await;
    let daemon = result.daemon;
    let mut reader = result.event_reader;

    // When the guest would be running, report done.
    let results = daemon.results.clone();
    let task_id = TaskId::for_analysis(&id, 1);
    {
        let task_id = task_id.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                if results.validate(&task_id, "127.0.0.1".parse().unwrap()).is_some() {
                    results.mark_done(&task_id);
                    return;
                }
            }
        });
    }

    drain_until(&daemon, &mut reader, |daemon| {
        daemon.state.lock().analysis_state(&id) == Some(AnalysisState::Finished)
    })
    .await;

    let state = daemon.state.lock();
    let analysis = state.analysis(&id).unwrap();
    assert_eq!(analysis.state, AnalysisState::Finished);
    assert_eq!(analysis.task_ids.len(), 1);

    let task = state.task(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Reported);
    assert_eq!(task.machine.as_ref().unwrap(), "win10-1");
    assert_eq!(task.platform, "windows");
    assert_eq!(task.os_version, "10");
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_submission_shares_one_blob() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = write_cwd(dir.path(), 8000, false);

    let a = submit_sample(&cwd, dir.path(), 4096, Settings::default());
    let b = submit_sample(&cwd, dir.path(), 4096, Settings::default());
    assert_ne!(a, b);

    // Two analysis directories, one binary blob.
    let mut blobs = 0;
    let mut stack = vec![cwd.binaries_dir()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            if entry.path().is_dir() {
                stack.push(entry.path());
            } else {
                blobs += 1;
            }
        }
    }
    assert_eq!(blobs, 1);
    assert!(cwd.analysis_dir(&a).join("analysis.json").exists());
    assert!(cwd.analysis_dir(&b).join("analysis.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn analysis_artifacts_land_in_the_analysis_directory() {
    let dir = tempfile::tempdir().unwrap();
    let agent_port = spawn_fake_agent().await;
    let cwd = write_cwd(dir.path(), agent_port, false);
    let id = submit_sample(&cwd, dir.path(), 512, Settings::default());

    let result = boot(cwd.clone()).await;
    let daemon = result.daemon;
    let mut reader = result.event_reader;

    drain_until(&daemon, &mut reader, |daemon| {
        let state = daemon.state.lock();
        matches!(
            state.analysis_state(&id),
            Some(AnalysisState::TasksPending | AnalysisState::Finished)
        )
    })
    .await;

    // identification.json and pre.json were persisted along the way.
    assert!(cwd.analysis_dir(&id).join("identification.json").exists());
    assert!(cwd.analysis_dir(&id).join("pre.json").exists());
}
