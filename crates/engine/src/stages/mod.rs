// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage worker pools: identification, pre-analysis, post-processing.
//!
//! Each pool is a bounded set of workers draining dispatch requests. A
//! stage job is a pure function from an immutable analysis snapshot (plus
//! the working directory) to an artifact and a recommended transition;
//! the result travels back to the controller as a `stage:complete` event.
//! Workers are idempotent: an existing artifact is returned as the cached
//! result instead of recomputing.

mod identification;
mod post;
mod pre;

pub use identification::IdentificationRunner;
pub use post::{NullSignatureHook, PostRunner, SignatureHook, MAX_SCORE};
pub use pre::PreRunner;

use async_trait::async_trait;
use cuckoo_core::{
    Analysis, ErrorKind, Event, Fault, Stage, StageOutcome, StageReport, Task, TaskId,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, warn};

/// Everything a stage worker may look at. Workers receive snapshots and
/// never mutate shared state.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: Stage,
    pub analysis: Analysis,
    /// Set for per-task stages (post).
    pub task_id: Option<TaskId>,
    /// Task row snapshot for per-task stages; carries the recorded
    /// errors (including the timeout marker) into post-processing.
    pub task: Option<Task>,
    pub analysis_dir: PathBuf,
    pub task_dir: Option<PathBuf>,
    /// Canonical binary blob for file targets.
    pub binary_path: Option<PathBuf>,
}

impl StageRequest {
    /// Where this stage's artifact lives.
    pub fn artifact_path(&self) -> PathBuf {
        let dir = match (&self.task_dir, self.stage) {
            (Some(task_dir), Stage::Post) => task_dir.clone(),
            _ => self.analysis_dir.clone(),
        };
        dir.join(self.stage.artifact_name())
    }
}

/// One stage's computation.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, request: &StageRequest) -> Result<StageReport, Fault>;
}

/// Worker counts and timeouts, from configuration.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub identification_workers: usize,
    pub pre_workers: usize,
    pub post_workers: usize,
    pub identification_timeout: Duration,
    pub pre_timeout: Duration,
    pub post_timeout: Duration,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            identification_workers: 2,
            pre_workers: 2,
            post_workers: 4,
            identification_timeout: Duration::from_secs(30),
            pre_timeout: Duration::from_secs(120),
            post_timeout: Duration::from_secs(300),
        }
    }
}

struct Pool {
    runner: Arc<dyn StageRunner>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

/// The three bounded pools plus the event channel back to the controller.
pub struct StagePools {
    identification: Pool,
    pre: Pool,
    post: Pool,
    event_tx: mpsc::Sender<Event>,
}

impl StagePools {
    pub fn new(
        settings: StageSettings,
        identification: Arc<dyn StageRunner>,
        pre: Arc<dyn StageRunner>,
        post: Arc<dyn StageRunner>,
        event_tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            identification: Pool {
                runner: identification,
                semaphore: Arc::new(Semaphore::new(settings.identification_workers)),
                timeout: settings.identification_timeout,
            },
            pre: Pool {
                runner: pre,
                semaphore: Arc::new(Semaphore::new(settings.pre_workers)),
                timeout: settings.pre_timeout,
            },
            post: Pool {
                runner: post,
                semaphore: Arc::new(Semaphore::new(settings.post_workers)),
                timeout: settings.post_timeout,
            },
            event_tx,
        }
    }

    fn pool(&self, stage: Stage) -> &Pool {
        match stage {
            Stage::Identification => &self.identification,
            Stage::Pre => &self.pre,
            Stage::Post => &self.post,
        }
    }

    /// Queue a stage job. The job runs on its pool as soon as a worker is
    /// free and reports back via `stage:complete`.
    pub fn dispatch(&self, request: StageRequest) {
        let pool = self.pool(request.stage);
        let runner = Arc::clone(&pool.runner);
        let semaphore = Arc::clone(&pool.semaphore);
        let timeout = pool.timeout;
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                // Semaphore closed: shutting down.
                return;
            };

            let outcome = run_one(runner.as_ref(), &request, timeout).await;
            let event = Event::StageComplete {
                stage: request.stage,
                analysis_id: request.analysis.id.clone(),
                task_id: request.task_id.clone(),
                outcome,
            };
            if event_tx.send(event).await.is_err() {
                error!(
                    stage = %request.stage,
                    analysis = %request.analysis.id,
                    "controller gone, dropping stage result"
                );
            }
        });
    }
}

/// Run one stage job: cached artifact, or compute under the stage timeout
/// and persist the artifact before reporting.
async fn run_one(
    runner: &dyn StageRunner,
    request: &StageRequest,
    timeout: Duration,
) -> StageOutcome {
    // Idempotence: an artifact from a previous invocation wins.
    let artifact_path = request.artifact_path();
    if let Some(report) = load_artifact(&artifact_path) {
        return StageOutcome::Completed { report };
    }

    let result = tokio::time::timeout(timeout, runner.run(request)).await;
    let report = match result {
        Ok(Ok(report)) => report,
        Ok(Err(fault)) => return StageOutcome::Failed { fault },
        Err(_) => {
            return StageOutcome::Failed {
                fault: Fault::new(
                    ErrorKind::StageTimeout,
                    format!(
                        "{} stage exceeded {}s",
                        request.stage,
                        timeout.as_secs()
                    ),
                ),
            }
        }
    };

    if let Err(e) = store_artifact(&artifact_path, &report) {
        warn!(
            artifact = %artifact_path.display(),
            error = %e,
            "failed to persist stage artifact"
        );
    }
    StageOutcome::Completed { report }
}

fn load_artifact(path: &PathBuf) -> Option<StageReport> {
    let raw = std::fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}

fn store_artifact(path: &PathBuf, report: &StageReport) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
