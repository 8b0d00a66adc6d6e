// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution helpers for hypervisor shell-outs.

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for hypervisor control commands (virsh, qemu-img).
pub const HYPERVISOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a subprocess command with a timeout.
///
/// Wraps `Command::output()` with `tokio::time::timeout`, converting
/// timeout expiration into a descriptive error message. The child process
/// is killed automatically if the timeout elapses (via the tokio `Child`
/// drop implementation).
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output, String> {
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(io_err)) => Err(format!("{} failed: {}", description, io_err)),
        Err(_elapsed) => Err(format!(
            "{} timed out after {}s",
            description,
            timeout.as_secs()
        )),
    }
}

/// Run a command and require a zero exit, returning trimmed stdout.
pub async fn run_checked(
    cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<String, String> {
    let output = run_with_timeout(cmd, timeout, description).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{} exited with {}: {}",
            description,
            output.status,
            stderr.trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
