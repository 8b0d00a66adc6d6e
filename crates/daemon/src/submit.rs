// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submission ingest: validate, materialize on disk, mark untracked.
//!
//! A submission becomes an analysis directory with an `analysis.json`
//! snapshot plus a sentinel under `storage/untracked/`; the controller
//! picks the sentinel up via `analysis:tracknew`. File bytes land in the
//! content-addressed binary store exactly once.

use crate::config::CuckooConfig;
use cuckoo_core::{
    Analysis, AnalysisId, Clock, CuckooCwd, Settings, TargetDescriptor,
};
use cuckoo_storage::{BinaryStore, BinaryStoreError};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid settings: {0}")]
    Settings(#[from] cuckoo_core::SettingsError),
    #[error("binary store: {0}")]
    Binary(#[from] BinaryStoreError),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("could not allocate an analysis id")]
    IdExhausted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Allocate a fresh id, colliding against the untracked sentinels and
/// existing analysis directories.
fn allocate_id(cwd: &CuckooCwd, clock: &impl Clock) -> Result<AnalysisId, SubmitError> {
    for _ in 0..32 {
        let id = AnalysisId::generate(clock);
        if !cwd.untracked_marker(&id).exists() && !cwd.analysis_dir(&id).exists() {
            return Ok(id);
        }
    }
    Err(SubmitError::IdExhausted)
}

fn materialize(
    cwd: &CuckooCwd,
    analysis: &Analysis,
) -> Result<(), SubmitError> {
    let dir = cwd.analysis_dir(&analysis.id);
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_vec_pretty(analysis)?;
    std::fs::write(dir.join("analysis.json"), json)?;

    // The sentinel goes last: its existence promises a complete
    // analysis.json underneath.
    std::fs::create_dir_all(cwd.untracked_dir())?;
    std::fs::write(cwd.untracked_marker(&analysis.id), b"")?;
    Ok(())
}

/// Submit a file target. Returns the new analysis id.
pub fn submit_file(
    cwd: &CuckooCwd,
    config: &CuckooConfig,
    clock: &impl Clock,
    source: &Path,
    settings: Settings,
) -> Result<AnalysisId, SubmitError> {
    settings.validate(&config.limits)?;

    let store = BinaryStore::new(cwd.binaries_dir())
        .with_size_limits(config.submit.min_file_size, config.submit.max_file_size);
    let sha256 = store.put_file(source)?;
    let size = std::fs::metadata(source)?.len();

    let filename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| sha256.clone());

    let id = allocate_id(cwd, clock)?;
    let analysis = Analysis::new(
        id.clone(),
        TargetDescriptor::File {
            filename,
            size,
            sha256,
            media_type: None,
        },
        settings,
        clock.epoch_ms(),
    );
    materialize(cwd, &analysis)?;

    info!(analysis = %id, target = %analysis.target.describe(), "file submitted");
    Ok(id)
}

/// Submit a URL target. Returns the new analysis id.
pub fn submit_url(
    cwd: &CuckooCwd,
    config: &CuckooConfig,
    clock: &impl Clock,
    url: &str,
    settings: Settings,
) -> Result<AnalysisId, SubmitError> {
    settings.validate(&config.limits)?;

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(SubmitError::InvalidUrl(url.to_string()));
    }

    let id = allocate_id(cwd, clock)?;
    let analysis = Analysis::new(
        id.clone(),
        TargetDescriptor::Url {
            url: url.to_string(),
        },
        settings,
        clock.epoch_ms(),
    );
    materialize(cwd, &analysis)?;

    info!(analysis = %id, url, "url submitted");
    Ok(id)
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
