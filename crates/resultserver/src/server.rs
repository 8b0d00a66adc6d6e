// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The result server: a long-running TCP acceptor that demultiplexes
//! guest uploads into per-task storage.
//!
//! Parallel connections per task are allowed; only writes to the same
//! destination file serialize (per-(task,stream) lock in the registry).
//! Reads apply TCP back-pressure naturally: a frame is written to disk
//! before the next one is read. Peer misbehavior (bad magic, unknown
//! task, wrong source IP, oversized frame) drops the connection; the task
//! itself proceeds.

use crate::frame::{self, FrameError, StreamKind};
use crate::registry::{RunningTasks, TaskRegistration};
use std::collections::BTreeSet;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ResultServerError {
    #[error("failed to bind result server at {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The accept loop plus the registry connections are validated against.
pub struct ResultServer {
    listener: TcpListener,
    registry: RunningTasks,
    max_frame_len: u32,
}

impl ResultServer {
    pub async fn bind(
        addr: SocketAddr,
        registry: RunningTasks,
        max_frame_len: u32,
    ) -> Result<Self, ResultServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ResultServerError::BindFailed(addr, e))?;
        info!(addr = %addr, "result server listening");
        Ok(Self {
            listener,
            registry,
            max_frame_len,
        })
    }

    /// The locally bound address (useful when the port was 0).
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registry = self.registry.clone();
                    let max_frame_len = self.max_frame_len;
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, peer, registry, max_frame_len).await
                        {
                            debug!(peer = %peer, error = %e, "result connection dropped");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "result server accept failed");
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: RunningTasks,
    max_frame_len: u32,
) -> Result<(), FrameError> {
    let header = frame::read_header(&mut stream).await?;

    // Unknown task or wrong source address: close immediately.
    let Some(registration) = registry.validate(&header.task_id, peer.ip()) else {
        warn!(
            task = %header.task_id,
            peer = %peer,
            "rejecting result connection (unknown task or wrong source)"
        );
        return Ok(());
    };

    debug!(task = %header.task_id, peer = %peer, "result connection accepted");

    let mut touched: BTreeSet<StreamKind> = BTreeSet::new();
    let mut saw_done = false;

    loop {
        let frame = match frame::read_frame(&mut stream, max_frame_len).await {
            Ok(Some(frame)) => frame,
            // Clean close at a frame boundary counts as completion.
            Ok(None) => break,
            Err(e) => {
                // Sync what we already accepted, then drop the peer.
                sync_touched(&registration, &touched);
                return Err(e);
            }
        };

        if frame.kind == StreamKind::Done {
            saw_done = true;
            break;
        }
        write_frame(&registry, &registration, frame.kind, &frame.payload).await?;
        touched.insert(frame.kind);
    }

    // Durability point: fsync everything this connection wrote, then
    // signal the waiting runner.
    sync_touched(&registration, &touched);
    if saw_done {
        debug!(task = %registration.task_id, "done frame received");
    }
    registry.mark_done(&registration.task_id);
    Ok(())
}

/// Write one frame's payload to its destination, holding the per-stream
/// single-writer lock for the duration of the write.
async fn write_frame(
    registry: &RunningTasks,
    registration: &TaskRegistration,
    kind: StreamKind,
    payload: &[u8],
) -> Result<(), FrameError> {
    let Some(lock) = registry.stream_lock(&registration.task_id, kind) else {
        // Task deregistered mid-upload; drop the rest silently.
        return Ok(());
    };
    let _guard = lock.lock().await;

    let dest = destination(registry, registration, kind);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if kind.is_append() {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&dest)?;
        file.write_all(payload)?;
    } else {
        std::fs::write(&dest, payload)?;
    }
    Ok(())
}

fn destination(
    registry: &RunningTasks,
    registration: &TaskRegistration,
    kind: StreamKind,
) -> PathBuf {
    if let Some(name) = kind.append_filename() {
        return registration.task_dir.join(name);
    }
    // Numbered streams: screenshots/0001.jpg, files/0001.bin, ...
    match kind.numbered_dir() {
        Some((dir, ext)) => {
            let index = registry.next_index(&registration.task_id, kind);
            registration
                .task_dir
                .join(dir)
                .join(format!("{index:04}.{ext}"))
        }
        None => registration.task_dir.join(kind.to_string()),
    }
}

/// Fsync the append files this connection touched. Numbered files are
/// synced implicitly by being fully written before the next read.
fn sync_touched(registration: &TaskRegistration, touched: &BTreeSet<StreamKind>) {
    for kind in touched {
        if let Some(name) = kind.append_filename() {
            sync_file(&registration.task_dir.join(name));
        }
    }
}

fn sync_file(path: &Path) {
    if let Ok(file) = std::fs::File::open(path) {
        if let Err(e) = file.sync_all() {
            warn!(path = %path.display(), error = %e, "fsync failed");
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
