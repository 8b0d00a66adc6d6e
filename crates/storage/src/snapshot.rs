// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! A snapshot is the complete materialized state, zstd-compressed, tagged
//! with the WAL sequence it covers and a schema version. Recovery loads the
//! snapshot, runs it through the migration registry, then replays WAL
//! entries after its sequence.

use crate::migration::{MigrationError, MigrationRegistry};
use crate::state::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Schema version written into new snapshots. Loading a newer version
/// refuses; loading an older one migrates.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Complete state at one point in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version, consumed by the migration registry.
    pub v: u32,
    /// WAL sequence number this snapshot covers.
    pub seq: u64,
    pub state: MaterializedState,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(seq: u64, state: MaterializedState) -> Self {
        Self {
            v: CURRENT_SNAPSHOT_VERSION,
            seq,
            state,
            created_at: Utc::now(),
        }
    }

    /// Save compressed, atomically (write to .tmp, fsync, rename).
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json.as_slice(), 3)
            .map_err(|e| SnapshotError::Io(std::io::Error::other(e)))?;
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Load and migrate a snapshot if one exists.
///
/// A corrupt snapshot is moved to a rotated `.bak` so startup can fall
/// back to WAL replay from sequence 0.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    if !path.exists() {
        return Ok(None);
    }

    let parsed: Result<Value, SnapshotError> = (|| {
        let file = File::open(path)?;
        let decoder = zstd::stream::read::Decoder::new(BufReader::new(file))
            .map_err(|e| SnapshotError::Io(std::io::Error::other(e)))?;
        Ok(serde_json::from_reader(decoder)?)
    })();

    let value = match parsed {
        Ok(value) => value,
        Err(e) => {
            let bak_path = rotate_bak_path(path);
            warn!(
                error = %e,
                path = %path.display(),
                bak = %bak_path.display(),
                "corrupt snapshot, moving aside and starting from the log",
            );
            fs::rename(path, &bak_path)?;
            return Ok(None);
        }
    };

    let migrated = MigrationRegistry::new().migrate_to(value, CURRENT_SNAPSHOT_VERSION)?;
    let snapshot: Snapshot = serde_json::from_value(migrated)?;
    Ok(Some(snapshot))
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
