// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller loop: sequential event processing from the WAL, plus
//! the flush and checkpoint housekeeping tasks.

use crate::event_bus::EventBus;
use crate::lifecycle::{DaemonState, LifecycleError};
use crate::EventReader;
use cuckoo_core::Event;
use cuckoo_storage::{Checkpointer, MaterializedState, Wal};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// Group-commit flush interval (~10ms durability window).
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Checkpoint interval.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// How often the untracked-submission directory is rescanned.
const SUBMISSION_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Run the controller loop until shutdown (signal or `shutdown` event).
pub async fn run_until_shutdown(
    daemon: DaemonState,
    mut event_reader: EventReader,
) -> Result<(), LifecycleError> {
    spawn_flush_task(daemon.event_bus.clone());
    spawn_checkpoint(
        Arc::clone(&daemon.state),
        event_reader.wal(),
        daemon.cwd.state_db_path(),
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    // NOTE: created outside the loop - select! re-evaluates branches on
    // each iteration, so a sleep() inside would reset on every event.
    let mut submission_scan = tokio::time::interval(SUBMISSION_SCAN_INTERVAL);

    loop {
        tokio::select! {
            result = event_reader.recv() => {
                match result {
                    Ok(Some(entry)) => {
                        let seq = entry.seq;
                        match entry.event {
                            Event::Shutdown => {
                                // Control signal; never replayed on restart.
                                event_reader.mark_processed(seq);
                                info!("shutdown event received");
                                break;
                            }
                            event => {
                                // Rows first, then reactions: queries and
                                // the controller both see the new state.
                                daemon.state.lock().apply_event(&event);
                                match daemon.process_event(event) {
                                    Ok(()) => event_reader.mark_processed(seq),
                                    Err(e) => {
                                        // An unprocessable event must not
                                        // wedge the loop; it will not get
                                        // more processable later.
                                        error!(seq, error = %e, "error processing event");
                                        event_reader.mark_processed(seq);
                                    }
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        info!("event bus closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "error reading from WAL");
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
            // New submissions land as untracked sentinels on disk.
            _ = submission_scan.tick() => {
                daemon.enqueue_untracked();
            }
        }
    }

    daemon.shutdown()?;
    Ok(())
}

/// Spawn a task that periodically flushes the event bus.
fn spawn_flush_task(event_bus: EventBus) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            interval.tick().await;
            if event_bus.needs_flush() {
                if let Err(e) = event_bus.flush() {
                    tracing::error!(error = %e, "failed to flush event bus");
                }
            }
        }
    });
}

/// Periodic snapshots with WAL truncation once the snapshot is durable.
fn spawn_checkpoint(
    state: Arc<Mutex<MaterializedState>>,
    wal: Arc<Mutex<Wal>>,
    db_path: PathBuf,
) {
    let checkpointer = Checkpointer::new(db_path);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        loop {
            interval.tick().await;

            let (state_clone, processed_seq) = {
                let state_guard = state.lock();
                let wal_guard = wal.lock();
                (state_guard.clone(), wal_guard.processed_seq())
            };
            if processed_seq == 0 {
                continue;
            }

            let handle = checkpointer.start(processed_seq, &state_clone);
            let result = tokio::task::spawn_blocking(move || handle.wait()).await;

            match result {
                Ok(Ok(checkpoint)) => {
                    tracing::debug!(seq = checkpoint.seq, bytes = checkpoint.size_bytes, "checkpoint complete");
                    // Truncation is only safe after the snapshot is durable.
                    let mut wal = wal.lock();
                    if let Err(e) = wal.truncate_before(processed_seq) {
                        tracing::warn!(error = %e, "failed to truncate WAL after checkpoint");
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "checkpoint failed, WAL not truncated");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "checkpoint task panicked");
                }
            }
        }
    });
}
