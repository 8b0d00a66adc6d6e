// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Main-node side: clients for remote task nodes, the machine poller,
//! and the remote-task watcher.
//!
//! The poller hits each node's `/machines` every 10 seconds; two
//! consecutive failures mark the node disconnected (it leaves the
//! scheduler's candidate set, in-flight tasks keep their deadline). Task
//! dispatch is retried three times before the task fails with
//! `NodeUnreachable`.

use crate::api::{DispatchRequest, TaskSnapshot};
use crate::transfer::unpack_task_dir;
use cuckoo_core::{
    Analysis, CuckooCwd, ErrorKind, Event, Fault, Machine, NodeName, Task, TaskId, TaskOutcome,
    TaskState,
};
use cuckoo_engine::{NodeDispatcher, STOP_GRACE};
use cuckoo_storage::{BinaryStore, MaterializedState};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Poll interval for remote machine lists.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive poll failures before a node counts as disconnected.
pub const DISCONNECT_THRESHOLD: u32 = 2;

/// Dispatch retry budget.
const DISPATCH_RETRIES: u32 = 3;

/// Poll interval for a dispatched task's state.
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum NodeClientError {
    #[error("node {node} unreachable: {message}")]
    Unreachable { node: String, message: String },
    #[error("node {node} answered {status}")]
    BadStatus { node: String, status: u16 },
    #[error("node {node} rejected the payload: {message}")]
    Rejected { node: String, message: String },
}

impl NodeClientError {
    pub fn to_fault(&self) -> Fault {
        Fault::new(ErrorKind::NodeUnreachable, self.to_string())
    }
}

/// One configured remote node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
}

/// HTTP client for one task node.
#[derive(Clone)]
pub struct NodeClient {
    record: NodeRecord,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(record: NodeRecord) -> Self {
        Self {
            record,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn name(&self) -> NodeName {
        NodeName::new(self.record.name.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.record.api_url.trim_end_matches('/'))
    }

    fn auth(&self) -> String {
        format!("token {}", self.record.api_key)
    }

    fn unreachable(&self, e: reqwest::Error) -> NodeClientError {
        NodeClientError::Unreachable {
            node: self.record.name.clone(),
            message: e.to_string(),
        }
    }

    fn check(&self, status: reqwest::StatusCode) -> Result<(), NodeClientError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(NodeClientError::BadStatus {
                node: self.record.name.clone(),
                status: status.as_u16(),
            })
        }
    }

    pub async fn machines(&self) -> Result<Vec<Machine>, NodeClientError> {
        let response = self
            .http
            .get(self.url("machines"))
            .header("authorization", self.auth())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response.status())?;
        response.json().await.map_err(|e| self.unreachable(e))
    }

    pub async fn upload_binary(
        &self,
        sha256: &str,
        bytes: Vec<u8>,
    ) -> Result<(), NodeClientError> {
        let response = self
            .http
            .post(self.url(&format!("binaries/{sha256}")))
            .header("authorization", self.auth())
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response.status())
    }

    pub async fn submit_task(
        &self,
        task: &Task,
        analysis: &Analysis,
    ) -> Result<(), NodeClientError> {
        let response = self
            .http
            .post(self.url("tasks"))
            .header("authorization", self.auth())
            .json(&DispatchRequest {
                task: task.clone(),
                analysis: analysis.clone(),
            })
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(NodeClientError::Rejected {
                node: self.record.name.clone(),
                message: "payload not present on node".to_string(),
            });
        }
        self.check(response.status())
    }

    pub async fn task_snapshot(&self, id: &TaskId) -> Result<TaskSnapshot, NodeClientError> {
        let response = self
            .http
            .get(self.url(&format!("tasks/{id}")))
            .header("authorization", self.auth())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response.status())?;
        response.json().await.map_err(|e| self.unreachable(e))
    }

    pub async fn fetch_result(
        &self,
        id: &TaskId,
        task_dir: &std::path::Path,
    ) -> Result<(), NodeClientError> {
        let response = self
            .http
            .get(self.url(&format!("tasks/{id}/result")))
            .header("authorization", self.auth())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response.status())?;
        let bytes = response.bytes().await.map_err(|e| self.unreachable(e))?;
        unpack_task_dir(&bytes, task_dir).map_err(|e| NodeClientError::Rejected {
            node: self.record.name.clone(),
            message: e.to_string(),
        })
    }

    pub async fn cancel(&self, id: &TaskId) -> Result<(), NodeClientError> {
        let response = self
            .http
            .delete(self.url(&format!("tasks/{id}")))
            .header("authorization", self.auth())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response.status())
    }
}

/// The main node's set of remote nodes; implements the scheduler's
/// dispatch hook and runs the pollers.
pub struct NodeSet {
    clients: HashMap<NodeName, NodeClient>,
    state: Arc<Mutex<MaterializedState>>,
    cwd: CuckooCwd,
    event_tx: mpsc::Sender<Event>,
    self_ref: std::sync::Weak<NodeSet>,
}

impl NodeSet {
    pub fn new(
        records: Vec<NodeRecord>,
        state: Arc<Mutex<MaterializedState>>,
        cwd: CuckooCwd,
        event_tx: mpsc::Sender<Event>,
    ) -> Arc<Self> {
        let clients = records
            .into_iter()
            .map(|record| {
                let client = NodeClient::new(record);
                (client.name(), client)
            })
            .collect();
        Arc::new_cyclic(|self_ref| Self {
            clients,
            state,
            cwd,
            event_tx,
            self_ref: self_ref.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Spawn one poller per node.
    pub fn spawn_pollers(&self) {
        for (name, client) in &self.clients {
            let name = name.clone();
            let client = client.clone();
            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                poll_node(name, client, event_tx).await;
            });
        }
    }

    async fn dispatch_and_watch(&self, task: Task, node: NodeName) {
        let Some(client) = self.clients.get(&node) else {
            warn!(task = %task.id, node = %node, "dispatch to unknown node");
            self.fail_task(
                &task.id,
                Fault::new(ErrorKind::NodeUnreachable, "unknown node"),
            )
            .await;
            return;
        };

        let analysis = {
            let state = self.state.lock();
            state.analysis(&task.analysis_id).cloned()
        };
        let Some(analysis) = analysis else {
            self.fail_task(
                &task.id,
                Fault::new(ErrorKind::StateInvariantViolation, "analysis row missing"),
            )
            .await;
            return;
        };

        if let Err(e) = self.submit_with_retry(client, &task, &analysis).await {
            warn!(task = %task.id, node = %node, error = %e, "dispatch failed");
            self.fail_task(&task.id, e.to_fault()).await;
            return;
        }

        self.watch(client.clone(), task).await;
    }

    async fn submit_with_retry(
        &self,
        client: &NodeClient,
        task: &Task,
        analysis: &Analysis,
    ) -> Result<(), NodeClientError> {
        let mut last = None;
        for attempt in 0..DISPATCH_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2u64 << attempt)).await;
            }

            let result = match client.submit_task(task, analysis).await {
                // The node wants the payload first.
                Err(NodeClientError::Rejected { .. }) => {
                    if let cuckoo_core::TargetDescriptor::File { sha256, .. } = &analysis.target {
                        let store = BinaryStore::new(self.cwd.binaries_dir());
                        let bytes = tokio::fs::read(store.path_of(sha256)).await;
                        match bytes {
                            Ok(bytes) => match client.upload_binary(sha256, bytes).await {
                                Ok(()) => client.submit_task(task, analysis).await,
                                Err(e) => Err(e),
                            },
                            Err(e) => {
                                return Err(NodeClientError::Rejected {
                                    node: client.record.name.clone(),
                                    message: format!("payload unreadable: {e}"),
                                })
                            }
                        }
                    } else {
                        return Err(NodeClientError::Rejected {
                            node: client.record.name.clone(),
                            message: "node rejected a url task".to_string(),
                        });
                    }
                }
                other => other,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or(NodeClientError::Unreachable {
            node: client.record.name.clone(),
            message: "no attempts made".to_string(),
        }))
    }

    /// Poll the remote task until terminal or deadline, then pull results
    /// and surface the outcome locally.
    async fn watch(&self, client: NodeClient, task: Task) {
        let deadline = Duration::from_secs(task.timeout as u64) + STOP_GRACE + Duration::from_secs(60);
        let started = tokio::time::Instant::now();

        loop {
            tokio::time::sleep(TASK_POLL_INTERVAL).await;

            if started.elapsed() > deadline {
                warn!(task = %task.id, "remote task exceeded its deadline");
                self.fail_task(
                    &task.id,
                    Fault::new(ErrorKind::NodeUnreachable, "remote task deadline exceeded"),
                )
                .await;
                return;
            }

            let snapshot = match client.task_snapshot(&task.id).await {
                Ok(snapshot) => snapshot,
                // Keep polling through transient node trouble until the
                // deadline; disconnection does not abandon in-flight work.
                Err(e) => {
                    warn!(task = %task.id, error = %e, "remote task poll failed");
                    continue;
                }
            };

            match snapshot.state {
                TaskState::Reported => {
                    let task_dir = self.cwd.task_dir(&task.id);
                    if let Err(e) = client.fetch_result(&task.id, &task_dir).await {
                        warn!(task = %task.id, error = %e, "result fetch failed");
                        self.fail_task(&task.id, e.to_fault()).await;
                        return;
                    }
                    info!(task = %task.id, "remote task results fetched");
                    let timed_out = snapshot
                        .errors
                        .get("task")
                        .map(|errors| errors.iter().any(|e| e == "timeout"))
                        .unwrap_or(false);
                    let _ = self
                        .event_tx
                        .send(Event::TaskFinished {
                            id: task.id.clone(),
                            outcome: TaskOutcome::Detonated { timed_out },
                        })
                        .await;
                    return;
                }
                TaskState::Failed => {
                    let message = snapshot
                        .errors
                        .values()
                        .flatten()
                        .next()
                        .cloned()
                        .unwrap_or_else(|| "remote task failed".to_string());
                    self.fail_task(&task.id, Fault::new(ErrorKind::NodeUnreachable, message))
                        .await;
                    return;
                }
                TaskState::Cancelled => {
                    let _ = self
                        .event_tx
                        .send(Event::TaskFinished {
                            id: task.id.clone(),
                            outcome: TaskOutcome::Cancelled,
                        })
                        .await;
                    return;
                }
                _ => {}
            }
        }
    }

    async fn fail_task(&self, id: &TaskId, fault: Fault) {
        let _ = self
            .event_tx
            .send(Event::TaskFinished {
                id: id.clone(),
                outcome: TaskOutcome::Failed { fault },
            })
            .await;
    }
}

impl NodeDispatcher for NodeSet {
    fn dispatch(&self, task: Task, node: NodeName) {
        if let Some(set) = self.self_ref.upgrade() {
            tokio::spawn(async move {
                set.dispatch_and_watch(task, node).await;
            });
        }
    }
}

/// One node's poll loop: refresh machines, flag disconnection after two
/// consecutive failures.
async fn poll_node(name: NodeName, client: NodeClient, event_tx: mpsc::Sender<Event>) {
    let mut failures = 0u32;
    let mut connected = false;
    let mut interval = tokio::time::interval(POLL_INTERVAL);

    loop {
        interval.tick().await;
        match client.machines().await {
            Ok(machines) => {
                failures = 0;
                connected = true;
                let event = Event::NodeMachines {
                    name: name.clone(),
                    machines,
                };
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                warn!(node = %name, failures, error = %e, "node poll failed");
                if failures == DISCONNECT_THRESHOLD && connected {
                    connected = false;
                    let event = Event::NodeDisconnected { name: name.clone() };
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
