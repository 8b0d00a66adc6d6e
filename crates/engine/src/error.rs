// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine.

use cuckoo_core::{AnalysisId, TaskId};
use thiserror::Error;

/// Errors that can occur inside the controller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("analysis not found: {0}")]
    AnalysisNotFound(AnalysisId),
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("post stage completed without a task id for {0}")]
    PostWithoutTask(AnalysisId),
    #[error("cannot load analysis.json for {id}: {message}")]
    AnalysisLoad { id: AnalysisId, message: String },
    #[error("analysis {id} cannot move from {from} to {to}")]
    BadTransition {
        id: AnalysisId,
        from: String,
        to: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
