// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn run_with_timeout_captures_output() {
    let mut cmd = Command::new("echo");
    cmd.arg("hello");
    let output = run_with_timeout(cmd, Duration::from_secs(5), "echo").await.unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
}

#[tokio::test]
async fn run_checked_rejects_nonzero_exit() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "echo boom >&2; exit 3"]);
    let err = run_checked(cmd, Duration::from_secs(5), "sh -c").await.unwrap_err();
    assert!(err.contains("boom"), "{err}");
    assert!(err.contains("sh -c"), "{err}");
}

#[tokio::test]
async fn timeout_produces_descriptive_error() {
    let mut cmd = Command::new("sleep");
    cmd.arg("5");
    let err = run_with_timeout(cmd, Duration::from_millis(50), "sleep")
        .await
        .unwrap_err();
    assert!(err.contains("timed out"), "{err}");
}
