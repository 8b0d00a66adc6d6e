// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling edge cases: unsatisfiable requirements and unreachable
//! routing.

use crate::prelude::*;
use cuckoo_core::{AnalysisState, Route, RouteKind, Settings, TaskPlatform, TaskState};

#[tokio::test(flavor = "multi_thread")]
async fn no_matching_machine_fails_the_task_not_the_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = write_cwd(dir.path(), 8000, false);

    // Only windows/10 machines exist.
    let id = submit_sample(
        &cwd,
        dir.path(),
        512,
        Settings {
            platforms: vec![TaskPlatform::new("linux", "22.04")],
            ..Settings::default()
        },
    );

    let result = boot(cwd).await;
    let daemon = result.daemon;
    let mut reader = result.event_reader;

    drain_until(&daemon, &mut reader, |daemon| {
        daemon.state.lock().analysis_state(&id) == Some(AnalysisState::Finished)
    })
    .await;

    let state = daemon.state.lock();
    let analysis = state.analysis(&id).unwrap();
    assert_eq!(analysis.state, AnalysisState::Finished, "not FATAL");

    let task = state.task(&analysis.task_ids[0]).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert!(
        task.errors["task"][0].contains("no_matching_machine"),
        "{:?}",
        task.errors
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn routing_enabled_with_unreachable_rooter_fails_routed_tasks() {
    let dir = tempfile::tempdir().unwrap();
    // Routing on, but no rooter listens on operational/rooter.sock.
    let cwd = write_cwd(dir.path(), 8000, true);

    let id = submit_sample(
        &cwd,
        dir.path(),
        512,
        Settings {
            route: Route::new(RouteKind::Internet),
            ..Settings::default()
        },
    );

    let result = boot(cwd).await;
    let daemon = result.daemon;
    let mut reader = result.event_reader;

    drain_until(&daemon, &mut reader, |daemon| {
        daemon.state.lock().analysis_state(&id) == Some(AnalysisState::Finished)
    })
    .await;

    let state = daemon.state.lock();
    let task = state.task(&state.analysis(&id).unwrap().task_ids[0]).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert!(
        task.errors["task"][0].contains("route_error"),
        "{:?}",
        task.errors
    );

    // The machine was never touched.
    for machine in daemon.pool.snapshot() {
        assert_eq!(machine.reserved_by, None);
        assert_eq!(machine.locked_by, None);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn one_machine_never_holds_two_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let agent_port = spawn_fake_agent().await;
    let cwd = write_cwd(dir.path(), agent_port, false);

    // Two analyses, same priority, one machine.
    let first = submit_sample(&cwd, dir.path(), 512, Settings::default());
    let second = submit_sample(&cwd, dir.path(), 512, Settings::default());

    let result = boot(cwd).await;
    let daemon = result.daemon;
    let mut reader = result.event_reader;

    // Let both analyses reach the task stage.
    drain_until(&daemon, &mut reader, |daemon| {
        let state = daemon.state.lock();
        let settled = |id| {
            matches!(
                state.analysis_state(id),
                Some(AnalysisState::TasksPending | AnalysisState::Finished)
            ) && !state.tasks_of(id).is_empty()
        };
        settled(&first) && settled(&second)
    })
    .await;

    // At every observation point, at most one task holds the machine.
    for _ in 0..20 {
        {
            let state = daemon.state.lock();
            let holders = state
                .tasks
                .values()
                .filter(|t| t.state.holds_machine())
                .count();
            assert!(holders <= 1, "machine double-booked");
        }
        drain(&daemon, &mut reader).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
