// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in post-processing: aggregate one task's collected artifacts.
//!
//! Scoring and family attribution belong to the signature ecosystem; the
//! pipeline defines the hook and a deliberately simple default that
//! aggregates the collected evidence (behavioral log, network capture,
//! dropped files, memory dump) and the task's recorded timeout state into
//! the 0-10 scale real hooks use.

use super::{StageRequest, StageRunner};
use async_trait::async_trait;
use cuckoo_core::{ErrorKind, Fault, PostReport, StageReport, Task};
use std::path::Path;
use std::sync::Arc;

/// Highest score a hook may assign.
pub const MAX_SCORE: u32 = 10;

/// Detection hook invoked over a task's result directory and row.
pub trait SignatureHook: Send + Sync {
    fn evaluate(&self, task_dir: &Path, task: &Task) -> PostReport;
}

/// Default hook: no signatures, evidence aggregation only.
///
/// One point per kind of collected evidence, plus one when the guest was
/// still busy at the deadline with evidence to show for it. Real
/// detections come from signature hooks layered on top.
#[derive(Debug, Clone, Default)]
pub struct NullSignatureHook;

fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

impl SignatureHook for NullSignatureHook {
    fn evaluate(&self, task_dir: &Path, task: &Task) -> PostReport {
        let mut score = 0;
        if non_empty_file(&task_dir.join("log.txt")) {
            score += 1;
        }
        if non_empty_file(&task_dir.join("network.pcap")) {
            score += 1;
        }
        if non_empty_dir(&task_dir.join("files")) {
            score += 1;
        }
        if non_empty_file(&task_dir.join("memory.dmp")) {
            score += 1;
        }

        // A detonation that ran out its whole budget while producing
        // evidence was still active at the deadline.
        let timed_out = task
            .errors
            .get("task")
            .map(|errors| errors.iter().any(|e| e == "timeout"))
            .unwrap_or(false);
        if timed_out && score > 0 {
            score += 1;
        }

        PostReport {
            score: score.min(MAX_SCORE),
            families: Vec::new(),
        }
    }
}

/// Post-processing stage over a finished task directory.
pub struct PostRunner {
    hook: Arc<dyn SignatureHook>,
}

impl PostRunner {
    pub fn new(hook: Arc<dyn SignatureHook>) -> Self {
        Self { hook }
    }
}

impl Default for PostRunner {
    fn default() -> Self {
        Self::new(Arc::new(NullSignatureHook))
    }
}

#[async_trait]
impl StageRunner for PostRunner {
    async fn run(&self, request: &StageRequest) -> Result<StageReport, Fault> {
        let Some(task_dir) = &request.task_dir else {
            return Err(Fault::new(
                ErrorKind::StateInvariantViolation,
                "post stage without a task directory",
            ));
        };
        let Some(task) = &request.task else {
            return Err(Fault::new(
                ErrorKind::StateInvariantViolation,
                "post stage without a task snapshot",
            ));
        };
        let report = self.hook.evaluate(task_dir, task);
        Ok(StageReport::Post(report))
    }
}

#[cfg(test)]
#[path = "post_tests.rs"]
mod tests;
