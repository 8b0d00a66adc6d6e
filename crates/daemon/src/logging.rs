// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon logging: non-blocking file appender with startup rotation.

use crate::env::loglevel_directive;
use cuckoo_core::CuckooCwd;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the log if it exceeds [`MAX_LOG_SIZE`]. Best-effort: rotation
/// failures never block startup.
pub fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Install the tracing subscriber writing to `logs/cuckoo.log`.
///
/// The returned guard must be held for the process lifetime; dropping it
/// stops the background writer.
pub fn setup_logging(
    cwd: &CuckooCwd,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    let log_path = cwd.log_path();
    std::fs::create_dir_all(cwd.logs_dir())?;
    rotate_log_if_needed(&log_path);

    let file_appender = tracing_appender::rolling::never(
        cwd.logs_dir(),
        log_path
            .file_name()
            .map(|n| n.to_owned())
            .unwrap_or_else(|| "cuckoo.log".into()),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::new(loglevel_directive());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
