// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background checkpointing: periodic durable snapshots that bound WAL
//! replay time.
//!
//! The invariant: the snapshot must be fully durable (tmp write, fsync,
//! atomic rename, directory fsync) before the WAL is truncated. The heavy
//! serialize/compress/write work runs on a dedicated thread; only the state
//! clone happens on the caller.

use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::MaterializedState;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("checkpoint thread died")]
    ThreadDied,
}

/// Result of a completed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointResult {
    pub seq: u64,
    pub size_bytes: u64,
}

/// Handle to a checkpoint running on its own thread. `wait()` must return
/// before the caller truncates the WAL.
pub struct CheckpointHandle {
    pub seq: u64,
    receiver: mpsc::Receiver<Result<CheckpointResult, CheckpointError>>,
    // NOTE(lifetime): Keep thread alive
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl CheckpointHandle {
    /// Block until the snapshot is fully durable.
    pub fn wait(self) -> Result<CheckpointResult, CheckpointError> {
        self.receiver
            .recv()
            .map_err(|_| CheckpointError::ThreadDied)?
    }
}

/// Runs snapshot saves for one state-db path.
pub struct Checkpointer {
    db_path: PathBuf,
}

impl Checkpointer {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    /// Start a background checkpoint covering `seq`.
    pub fn start(&self, seq: u64, state: &MaterializedState) -> CheckpointHandle {
        let state = state.clone();
        let db_path = self.db_path.clone();
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let _ = tx.send(write_durable(seq, state, &db_path));
        });

        CheckpointHandle {
            seq,
            receiver: rx,
            handle,
        }
    }

    /// Synchronous checkpoint, used on shutdown.
    pub fn checkpoint_sync(
        &self,
        seq: u64,
        state: &MaterializedState,
    ) -> Result<CheckpointResult, CheckpointError> {
        write_durable(seq, state.clone(), &self.db_path)
    }
}

fn write_durable(
    seq: u64,
    state: MaterializedState,
    db_path: &Path,
) -> Result<CheckpointResult, CheckpointError> {
    Snapshot::new(seq, state).save(db_path)?;

    // Make the rename itself durable across power loss before the caller
    // truncates the WAL.
    if let Some(parent) = db_path.parent() {
        File::open(parent)?.sync_all()?;
    }

    let size_bytes = std::fs::metadata(db_path)?.len();
    Ok(CheckpointResult { seq, size_bytes })
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
