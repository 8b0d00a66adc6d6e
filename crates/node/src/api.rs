// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task-node HTTP API.
//!
//! Endpoints (all under bearer auth `Authorization: token <key>`):
//! `GET /machines`, `POST /binaries/{sha256}`, `POST /tasks`,
//! `GET /tasks/{id}`, `GET /tasks/{id}/result`, `DELETE /tasks/{id}`.
//!
//! `POST /tasks` injects the dispatched task into the node's own
//! controller loop; the node then schedules, detonates and
//! post-processes it locally, and the main node polls for the terminal
//! state before pulling the result tarball.

use crate::transfer::pack_task_dir;
use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cuckoo_core::{
    Analysis, AnalysisState, CuckooCwd, Event, Machine, Task, TaskId, TaskState,
};
use cuckoo_machinery::MachinePool;
use cuckoo_storage::{BinaryStore, MaterializedState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NodeApiError {
    #[error("failed to bind node api at {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),
}

/// Dispatch request from the main node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub task: Task,
    /// Analysis snapshot (settings + target) the task belongs to.
    pub analysis: Analysis,
}

/// Task state snapshot returned by `GET /tasks/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub score: u32,
    pub families: Vec<String>,
    pub errors: std::collections::BTreeMap<String, Vec<String>>,
}

/// Shared state behind the router.
#[derive(Clone)]
pub struct NodeApi {
    pub pool: MachinePool,
    pub state: Arc<Mutex<MaterializedState>>,
    pub cwd: CuckooCwd,
    pub event_tx: mpsc::Sender<Event>,
    pub api_key: Arc<String>,
}

impl NodeApi {
    pub fn router(self) -> Router {
        Router::new()
            .route("/machines", get(list_machines))
            .route("/binaries/{sha256}", post(store_binary))
            .route("/tasks", post(dispatch_task))
            .route(
                "/tasks/{id}",
                get(task_snapshot).delete(cancel_task),
            )
            .route("/tasks/{id}/result", get(task_result))
            .with_state(self)
    }

    /// Bind and serve until the process exits.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), NodeApiError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NodeApiError::BindFailed(addr, e))?;
        info!(addr = %addr, "node api listening");
        let router = self.router();
        axum::serve(listener, router)
            .await
            .map_err(|e| NodeApiError::BindFailed(addr, std::io::Error::other(e)))
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), StatusCode> {
        let expected = format!("token {}", self.api_key);
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some(got) if got == expected => Ok(()),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

async fn list_machines(
    State(api): State<NodeApi>,
    headers: HeaderMap,
) -> Result<Json<Vec<Machine>>, StatusCode> {
    api.authorize(&headers)?;
    Ok(Json(api.pool.snapshot()))
}

async fn store_binary(
    State(api): State<NodeApi>,
    AxumPath(sha256): AxumPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    api.authorize(&headers)?;

    let store = BinaryStore::new(api.cwd.binaries_dir());
    if store.contains(&sha256) {
        return Ok(StatusCode::OK);
    }
    let digest = store
        .put_bytes(&body)
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    if digest != sha256 {
        warn!(claimed = %sha256, actual = %digest, "binary upload digest mismatch");
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(StatusCode::CREATED)
}

async fn dispatch_task(
    State(api): State<NodeApi>,
    headers: HeaderMap,
    Json(request): Json<DispatchRequest>,
) -> Result<StatusCode, StatusCode> {
    api.authorize(&headers)?;

    // For file targets, the payload must already be in the binary store.
    if let cuckoo_core::TargetDescriptor::File { sha256, .. } = &request.analysis.target {
        let store = BinaryStore::new(api.cwd.binaries_dir());
        if !store.contains(sha256) {
            return Err(StatusCode::CONFLICT);
        }
    }

    info!(task = %request.task.id, "accepting dispatched task");

    // Seed the node-local rows, then let the node's controller schedule
    // the task like any other pending work.
    let mut analysis = request.analysis;
    analysis.state = AnalysisState::TasksPending;
    analysis.task_ids.clear();
    let mut task = request.task;
    task.state = TaskState::Pending;
    task.machine = None;
    task.node = None;

    let events = [
        Event::AnalysisTracked {
            analysis: Box::new(analysis),
        },
        Event::TaskCreated {
            task: Box::new(task),
        },
    ];
    for event in events {
        if api.event_tx.send(event).await.is_err() {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    }
    Ok(StatusCode::ACCEPTED)
}

async fn task_snapshot(
    State(api): State<NodeApi>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<TaskSnapshot>, StatusCode> {
    api.authorize(&headers)?;

    let state = api.state.lock();
    let task = state
        .task(&TaskId::new(id))
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(TaskSnapshot {
        id: task.id.clone(),
        state: task.state,
        score: task.score,
        families: task.families.clone(),
        errors: task.errors.clone(),
    }))
}

async fn task_result(
    State(api): State<NodeApi>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = api.authorize(&headers) {
        return status.into_response();
    }

    let task_id = TaskId::new(id);
    let task_dir = api.cwd.task_dir(&task_id);
    match pack_task_dir(&task_dir) {
        Ok(bytes) => (
            StatusCode::OK,
            [("content-type", "application/zstd")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!(task = %task_id, error = %e, "cannot pack result tarball");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn cancel_task(
    State(api): State<NodeApi>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    api.authorize(&headers)?;

    let event = Event::TaskCancel {
        id: TaskId::new(id),
    };
    api.event_tx
        .send(event)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
