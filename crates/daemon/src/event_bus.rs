// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus for the controller loop.
//!
//! Events are appended to the WAL before the controller sees them, so a
//! crash replays exactly the unprocessed tail. Appends are buffered and
//! group-committed (~10ms durability window).

use cuckoo_core::Event;
use cuckoo_storage::{Wal, WalEntry, WalError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sending half: append events to the WAL and wake the loop.
#[derive(Clone)]
pub struct EventBus {
    wal: Arc<Mutex<Wal>>,
    wake_tx: mpsc::Sender<()>,
}

/// Receiving half, owned by the controller loop.
pub struct EventReader {
    wal: Arc<Mutex<Wal>>,
    wake_rx: mpsc::Receiver<()>,
}

impl EventBus {
    pub fn new(wal: Wal) -> (Self, EventReader) {
        let wal = Arc::new(Mutex::new(wal));
        let (wake_tx, wake_rx) = mpsc::channel(1);
        (
            Self {
                wal: Arc::clone(&wal),
                wake_tx,
            },
            EventReader { wal, wake_rx },
        )
    }

    /// Append an event (buffered; durable on the next flush). Returns the
    /// assigned sequence number.
    pub fn send(&self, event: Event) -> Result<u64, WalError> {
        let seq = {
            let mut wal = self.wal.lock();
            wal.append(&event)?
        };
        // Non-blocking wake; a full channel means the loop is already up.
        let _ = self.wake_tx.try_send(());
        Ok(seq)
    }

    /// Flush buffered events to disk with one fsync.
    pub fn flush(&self) -> Result<(), WalError> {
        self.wal.lock().flush()
    }

    pub fn needs_flush(&self) -> bool {
        self.wal.lock().needs_flush()
    }

    pub fn processed_seq(&self) -> u64 {
        self.wal.lock().processed_seq()
    }
}

impl EventReader {
    /// Next unprocessed event, waiting for a wake when the log is drained.
    /// `None` when every sender is gone.
    pub async fn recv(&mut self) -> Result<Option<WalEntry>, WalError> {
        loop {
            {
                let mut wal = self.wal.lock();
                if let Some(entry) = wal.next_unprocessed()? {
                    return Ok(Some(entry));
                }
            }
            if self.wake_rx.recv().await.is_none() {
                return Ok(None);
            }
        }
    }

    pub fn mark_processed(&self, seq: u64) {
        self.wal.lock().mark_processed(seq);
    }

    pub fn wal(&self) -> Arc<Mutex<Wal>> {
        Arc::clone(&self.wal)
    }
}

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
