// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cuckoo-storage: durable state for the orchestrator.
//!
//! The state store is a JSON snapshot (`operational/taskqueue.db`) plus a
//! JSONL write-ahead log (`operational/taskqueue.wal`). Recovery loads the
//! snapshot and replays WAL entries after its sequence number. The binary
//! store keeps submitted files content-addressed by sha256.

pub mod binaries;
pub mod checkpoint;
pub mod migration;
pub mod snapshot;
pub mod state;
pub mod wal;

pub use binaries::{BinaryStore, BinaryStoreError};
pub use checkpoint::{CheckpointError, CheckpointHandle, CheckpointResult, Checkpointer};
pub use migration::{Migration, MigrationError, MigrationRegistry};
pub use snapshot::{load_snapshot, Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::{MaterializedState, NodeStatus};
pub use wal::{Wal, WalEntry, WalError};
