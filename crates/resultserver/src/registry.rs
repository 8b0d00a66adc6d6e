// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of tasks currently allowed to upload results.
//!
//! The task runner registers a task (with its machine's IP and result
//! directory) before the guest starts and deregisters after stop. The
//! server validates every connection against this registry and notifies
//! the waiting runner when the guest reports `done`.

use crate::frame::StreamKind;
use cuckoo_core::TaskId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Registration of one running task.
#[derive(Clone)]
pub struct TaskRegistration {
    pub task_id: TaskId,
    pub machine_ip: IpAddr,
    pub task_dir: PathBuf,
}

struct TaskEntry {
    registration: TaskRegistration,
    done: Arc<Notify>,
    done_flag: bool,
    /// Next index per numbered stream kind.
    counters: HashMap<StreamKind, u32>,
    /// Per-(task,stream) single-writer locks.
    stream_locks: HashMap<StreamKind, Arc<tokio::sync::Mutex<()>>>,
}

/// Shared registry; cheap to clone.
#[derive(Clone, Default)]
pub struct RunningTasks {
    inner: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow uploads for a task. Returns a notifier that fires when the
    /// guest sends `done` (or closes cleanly).
    pub fn register(&self, registration: TaskRegistration) -> Arc<Notify> {
        let done = Arc::new(Notify::new());
        let entry = TaskEntry {
            registration: registration.clone(),
            done: Arc::clone(&done),
            done_flag: false,
            counters: HashMap::new(),
            stream_locks: HashMap::new(),
        };
        self.inner.lock().insert(registration.task_id, entry);
        done
    }

    /// Stop accepting uploads for a task.
    pub fn deregister(&self, task_id: &TaskId) {
        self.inner.lock().remove(task_id);
    }

    /// Validate a connection: the task must be registered and the peer
    /// must be the machine the task runs on.
    pub fn validate(&self, task_id: &TaskId, peer: IpAddr) -> Option<TaskRegistration> {
        let inner = self.inner.lock();
        let entry = inner.get(task_id)?;
        if entry.registration.machine_ip != peer {
            return None;
        }
        Some(entry.registration.clone())
    }

    /// Signal completion. Idempotent; late signals after deregistration
    /// are dropped.
    pub fn mark_done(&self, task_id: &TaskId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(task_id) {
            if !entry.done_flag {
                entry.done_flag = true;
                entry.done.notify_waiters();
                entry.done.notify_one();
            }
        }
    }

    /// Whether `done` has already been observed for the task.
    pub fn is_done(&self, task_id: &TaskId) -> bool {
        self.inner
            .lock()
            .get(task_id)
            .map(|e| e.done_flag)
            .unwrap_or(false)
    }

    /// Next index for a numbered stream (screenshots, dropped files).
    pub fn next_index(&self, task_id: &TaskId, kind: StreamKind) -> u32 {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(task_id) else {
            return 0;
        };
        let counter = entry.counters.entry(kind).or_insert(0);
        *counter += 1;
        *counter
    }

    /// The single-writer lock for a (task, stream) destination.
    pub fn stream_lock(
        &self,
        task_id: &TaskId,
        kind: StreamKind,
    ) -> Option<Arc<tokio::sync::Mutex<()>>> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(task_id)?;
        Some(Arc::clone(
            entry
                .stream_locks
                .entry(kind)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        ))
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
