// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task runner: one unit per assigned task, driving route → restore →
//! deliver → wait → stop → collect.
//!
//! Every exit path (success, failure, cancellation) releases the machine
//! and the route before the controller hears `task:finished`. The machine
//! lock is scoped to the runner; a fatal machinery error turns into a
//! disable-on-release.

use crate::agent::AgentClient;
use cuckoo_core::{
    ErrorKind, Event, Fault, Machine, MachineState, Task, TaskId, TaskOutcome, TaskState,
};
use cuckoo_machinery::{MachineryDriver, MachineryError, MachinePool};
use cuckoo_resultserver::{RunningTasks, TaskRegistration};
use cuckoo_rooter::RooterClient;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Wall-clock grace added to the task timeout before a forced stop.
pub const STOP_GRACE: Duration = Duration::from_secs(30);

/// Restore retry schedule: two retries with exponential backoff.
const RESTORE_BACKOFF: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(4)];

/// What the runner detonates.
#[derive(Debug, Clone)]
pub enum Payload {
    File { filename: String, path: PathBuf },
    Url { url: String },
}

/// Everything one runner needs, assembled by the controller side.
pub struct TaskRunContext {
    pub task: Task,
    pub machine: Machine,
    pub pool: MachinePool,
    pub driver: Arc<dyn MachineryDriver>,
    /// None when network routing is disabled.
    pub rooter: Option<RooterClient>,
    pub results: RunningTasks,
    pub agent: AgentClient,
    pub task_dir: PathBuf,
    pub payload: Payload,
    pub event_tx: mpsc::Sender<Event>,
    pub epoch_ms: Arc<dyn Fn() -> u64 + Send + Sync>,
    /// Wall-clock slack past the task timeout before the forced stop.
    pub grace: Duration,
}

/// Registry of live runners, keyed by task, with their cancel handles.
#[derive(Clone, Default)]
pub struct RunnerSet {
    inner: Arc<Mutex<HashMap<TaskId, oneshot::Sender<()>>>>,
}

impl RunnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a runner for an assigned task.
    pub fn launch(&self, ctx: TaskRunContext) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task_id = ctx.task.id.clone();
        self.inner.lock().insert(task_id.clone(), cancel_tx);

        let registry = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_task(ctx, cancel_rx).await;
            registry.lock().remove(&task_id);
        });
    }

    /// Interrupt a runner. Returns false when no runner is live for the
    /// task (already finished, or never launched).
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.inner.lock().remove(task_id) {
            Some(cancel_tx) => cancel_tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.inner.lock().contains_key(task_id)
    }
}

/// Production launcher: builds run contexts from the shared collaborators
/// and spawns runners on the runner set.
pub struct EngineLauncher {
    pub pool: MachinePool,
    /// Machinery name to driver, built at startup from configuration.
    pub drivers: HashMap<String, Arc<dyn MachineryDriver>>,
    pub rooter: Option<RooterClient>,
    pub results: RunningTasks,
    pub agent: AgentClient,
    pub event_tx: mpsc::Sender<Event>,
    pub epoch_ms: Arc<dyn Fn() -> u64 + Send + Sync>,
    pub runners: RunnerSet,
}

impl crate::controller::TaskLauncher for EngineLauncher {
    fn launch(&self, task: Task, machine: Machine, payload: Payload, task_dir: PathBuf) {
        let Some(driver) = self.drivers.get(&machine.machinery) else {
            // Enumerated drivers are resolved at startup; reaching this
            // point is a configuration/state mismatch.
            warn!(
                task = %task.id,
                machinery = %machine.machinery,
                "no driver for machinery, failing task"
            );
            let event_tx = self.event_tx.clone();
            let id = task.id;
            self.pool.release(&machine.name, (self.epoch_ms)(), None);
            tokio::spawn(async move {
                send(
                    &event_tx,
                    Event::TaskFinished {
                        id,
                        outcome: TaskOutcome::Failed {
                            fault: Fault::new(
                                ErrorKind::StateInvariantViolation,
                                "machine references an unknown machinery",
                            ),
                        },
                    },
                )
                .await;
            });
            return;
        };

        self.runners.launch(TaskRunContext {
            task,
            machine,
            pool: self.pool.clone(),
            driver: Arc::clone(driver),
            rooter: self.rooter.clone(),
            results: self.results.clone(),
            agent: self.agent.clone(),
            task_dir,
            payload,
            event_tx: self.event_tx.clone(),
            epoch_ms: Arc::clone(&self.epoch_ms),
            grace: STOP_GRACE,
        });
    }

    fn cancel(&self, task_id: &TaskId) -> bool {
        self.runners.cancel(task_id)
    }
}

/// Drive one task end to end, then notify the controller.
pub async fn run_task(mut ctx: TaskRunContext, mut cancel_rx: oneshot::Receiver<()>) {
    let task_id = ctx.task.id.clone();
    info!(task = %task_id, machine = %ctx.machine.name, "task runner starting");

    let detonation = detonate(&mut ctx, &mut cancel_rx).await;

    // Teardown happens for every path before task:finished is emitted.
    let Teardown {
        outcome,
        route_handle,
        disable_reason,
    } = detonation;

    ctx.results.deregister(&task_id);

    if let Some(handle) = route_handle {
        remove_route(&ctx, &handle).await;
    }

    ctx.pool.release(
        &ctx.machine.name,
        (ctx.epoch_ms)(),
        disable_reason.as_deref(),
    );

    if let Some(reason) = &disable_reason {
        send(
            &ctx.event_tx,
            Event::MachineGone {
                name: ctx.machine.name.clone(),
                reason: reason.clone(),
            },
        )
        .await;
    }

    info!(task = %task_id, outcome = ?outcome, "task runner finished");
    send(
        &ctx.event_tx,
        Event::TaskFinished {
            id: task_id,
            outcome,
        },
    )
    .await;
}

struct Teardown {
    outcome: TaskOutcome,
    route_handle: Option<String>,
    disable_reason: Option<String>,
}

impl Teardown {
    fn failed(fault: Fault) -> Self {
        Self {
            outcome: TaskOutcome::Failed { fault },
            route_handle: None,
            disable_reason: None,
        }
    }
}

async fn detonate(ctx: &mut TaskRunContext, cancel_rx: &mut oneshot::Receiver<()>) -> Teardown {
    let task_id = ctx.task.id.clone();

    // The scoped machine lock: reservation was taken by the scheduler,
    // the lock pins the machine to this runner until release.
    if let Err(e) = ctx.pool.lock(&ctx.machine.name, &task_id) {
        return Teardown::failed(Fault::new(
            ErrorKind::StateInvariantViolation,
            format!("machine lock: {e}"),
        ));
    }

    // 1. Apply route.
    let route_handle = match apply_route(ctx).await {
        Ok(handle) => handle,
        Err(fault) => return Teardown::failed(fault),
    };

    send(
        &ctx.event_tx,
        Event::TaskStateChanged {
            id: task_id.clone(),
            state: TaskState::Starting,
        },
    )
    .await;

    // Uploads become valid the moment the guest may boot.
    let done = ctx.results.register(TaskRegistration {
        task_id: task_id.clone(),
        machine_ip: ctx.machine.ip,
        task_dir: ctx.task_dir.clone(),
    });

    // 2. Restore with retry.
    if let Err(teardown) = restore_machine(ctx, cancel_rx, &route_handle).await {
        return teardown;
    }

    send(
        &ctx.event_tx,
        Event::TaskStateChanged {
            id: task_id.clone(),
            state: TaskState::Running,
        },
    )
    .await;

    // 3. Deliver the payload; one restore-again retry on a dead agent.
    if let Err(fault) = deliver_with_retry(ctx, cancel_rx).await {
        stop_machine(ctx).await.ok();
        return Teardown {
            outcome: TaskOutcome::Failed { fault },
            route_handle,
            disable_reason: None,
        };
    }

    // 4. Await completion or deadline.
    let deadline = Duration::from_secs(ctx.task.timeout as u64) + ctx.grace;
    let timed_out;
    tokio::select! {
        _ = done.notified() => {
            timed_out = false;
            debug!(task = %task_id, "guest reported done");
        }
        _ = tokio::time::sleep(deadline) => {
            timed_out = true;
            warn!(task = %task_id, "detonation deadline reached, forcing stop");
        }
        _ = &mut *cancel_rx => {
            stop_for_cancel(ctx).await;
            return Teardown {
                outcome: TaskOutcome::Cancelled,
                route_handle,
                disable_reason: None,
            };
        }
    }

    // Double-check: done may have raced the deadline.
    let timed_out = timed_out && !ctx.results.is_done(&task_id);

    // A timed-out guest is still running; capture its memory for
    // post-processing where the machinery supports a dump.
    if timed_out && ctx.driver.caps().dump_memory {
        let dest = ctx.task_dir.join("memory.dmp");
        if let Err(e) = ctx.driver.dump_memory(&ctx.machine, &dest).await {
            warn!(task = %task_id, error = %e, "memory dump failed");
        }
    }

    // 5. Stop (ungraceful; the disposable disk is discarded).
    send(
        &ctx.event_tx,
        Event::TaskStateChanged {
            id: task_id.clone(),
            state: TaskState::Stopping,
        },
    )
    .await;
    let disable_reason = match stop_machine(ctx).await {
        Ok(()) => None,
        Err(e) if e.is_fatal() => Some(e.to_string()),
        Err(e) => {
            debug!(task = %task_id, error = %e, "non-fatal stop error");
            None
        }
    };

    Teardown {
        outcome: TaskOutcome::Detonated { timed_out },
        route_handle,
        disable_reason,
    }
}

/// Step 1: ask the rooter for the task's route.
async fn apply_route(ctx: &TaskRunContext) -> Result<Option<String>, Fault> {
    if !ctx.task.route.needs_rooter() {
        return Ok(None);
    }
    let Some(rooter) = &ctx.rooter else {
        return Err(Fault::new(
            ErrorKind::RouteError,
            "network routing requested but no rooter is configured",
        ));
    };

    let handle = rooter
        .apply(&ctx.task.route, ctx.machine.ip)
        .await
        .map_err(|e| e.to_fault())?;

    send(
        &ctx.event_tx,
        Event::RouteApplied {
            task_id: ctx.task.id.clone(),
            handle: handle.clone(),
        },
    )
    .await;
    Ok(Some(handle))
}

/// Step 2: restore, retrying transient failures twice with backoff.
async fn restore_machine(
    ctx: &TaskRunContext,
    cancel_rx: &mut oneshot::Receiver<()>,
    route_handle: &Option<String>,
) -> Result<(), Teardown> {
    ctx.pool.mark_state(&ctx.machine.name, MachineState::Restoring);

    let mut last_error: Option<MachineryError> = None;
    for attempt in 0..=RESTORE_BACKOFF.len() {
        if attempt > 0 {
            let backoff = RESTORE_BACKOFF[attempt - 1];
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = &mut *cancel_rx => {
                    return Err(Teardown {
                        outcome: TaskOutcome::Cancelled,
                        route_handle: route_handle.clone(),
                        disable_reason: None,
                    });
                }
            }
        }

        match ctx.driver.restore_start(&ctx.machine).await {
            Ok(()) => {
                if let Err(e) = resume_if_paused(ctx).await {
                    warn!(machine = %ctx.machine.name, error = %e, "resume after restore failed");
                    stop_machine(ctx).await.ok();
                    let disable_reason = e.is_fatal().then(|| e.to_string());
                    return Err(Teardown {
                        outcome: TaskOutcome::Failed { fault: e.to_fault() },
                        route_handle: route_handle.clone(),
                        disable_reason,
                    });
                }
                ctx.pool.mark_state(&ctx.machine.name, MachineState::Running);
                return Ok(());
            }
            Err(e) if e.is_fatal() => {
                warn!(machine = %ctx.machine.name, error = %e, "fatal restore failure");
                return Err(Teardown {
                    outcome: TaskOutcome::Failed { fault: e.to_fault() },
                    route_handle: route_handle.clone(),
                    disable_reason: Some(e.to_string()),
                });
            }
            Err(e) => {
                warn!(
                    machine = %ctx.machine.name,
                    attempt,
                    error = %e,
                    "transient restore failure"
                );
                last_error = Some(e);
            }
        }
    }

    let fault = last_error
        .map(|e| e.to_fault())
        .unwrap_or_else(|| Fault::new(ErrorKind::MachineryTransient, "restore failed"));
    // Two retries exhausted: take the machine out of rotation.
    let disable_reason = format!("restore failed after retries: {}", fault.message);
    Err(Teardown {
        outcome: TaskOutcome::Failed { fault },
        route_handle: route_handle.clone(),
        disable_reason: Some(disable_reason),
    })
}

/// Step 3: upload and execute, restoring once more if the agent is dead.
async fn deliver_with_retry(
    ctx: &TaskRunContext,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> Result<(), Fault> {
    match deliver(ctx).await {
        Ok(()) => return Ok(()),
        Err(fault) => {
            warn!(task = %ctx.task.id, error = %fault, "agent delivery failed, restoring once");
            stop_machine(ctx).await.ok();
            ctx.pool.mark_state(&ctx.machine.name, MachineState::Restoring);
            if let Err(e) = ctx.driver.restore_start(&ctx.machine).await {
                return Err(e.to_fault());
            }
            if let Err(e) = resume_if_paused(ctx).await {
                return Err(e.to_fault());
            }
            ctx.pool.mark_state(&ctx.machine.name, MachineState::Running);
        }
    }

    // A cancel during the retry window still wins.
    if cancel_rx.try_recv().is_ok() {
        return Err(Fault::new(ErrorKind::AgentUnreachable, "cancelled"));
    }
    deliver(ctx).await
}

async fn deliver(ctx: &TaskRunContext) -> Result<(), Fault> {
    match &ctx.payload {
        Payload::File { filename, path } => {
            let bytes = std::fs::read(path).map_err(|e| {
                Fault::new(
                    ErrorKind::StateInvariantViolation,
                    format!("payload {} unreadable: {e}", path.display()),
                )
            })?;
            let guest_path = format!("payload/{filename}");
            ctx.agent
                .store(&ctx.machine, &guest_path, bytes)
                .await
                .map_err(|e| e.to_fault())?;
            ctx.agent
                .execute(&ctx.machine, &guest_path)
                .await
                .map_err(|e| e.to_fault())
        }
        Payload::Url { url } => ctx
            .agent
            .execute(&ctx.machine, &format!("open {url}"))
            .await
            .map_err(|e| e.to_fault()),
    }
}

/// Some hypervisors leave a restored machine paused. Resume it when the
/// machinery supports that; skip (with a warning) when it does not,
/// rather than probing by catching errors.
async fn resume_if_paused(ctx: &TaskRunContext) -> Result<(), MachineryError> {
    let state = match ctx.driver.state(&ctx.machine).await {
        Ok(state) => state,
        Err(e) => {
            warn!(machine = %ctx.machine.name, error = %e, "state query after restore failed");
            return Ok(());
        }
    };
    if state != MachineState::Suspended {
        return Ok(());
    }
    if !ctx.driver.caps().handle_paused {
        warn!(
            machine = %ctx.machine.name,
            "machine restored paused and the machinery cannot resume it"
        );
        return Ok(());
    }
    ctx.driver.handle_paused(&ctx.machine).await
}

/// Cancellation prefers a graceful ACPI shutdown when the machinery
/// offers one; the hard stop follows as the backstop either way.
async fn stop_for_cancel(ctx: &TaskRunContext) {
    if ctx.driver.caps().acpi_stop {
        if let Err(e) = ctx.driver.acpi_stop(&ctx.machine).await {
            debug!(task = %ctx.task.id, error = %e, "acpi stop failed, forcing");
        }
    }
    stop_machine(ctx).await.ok();
}

/// Step 5: hard stop. Transient errors (already off) are fine.
async fn stop_machine(ctx: &TaskRunContext) -> Result<(), MachineryError> {
    ctx.pool.mark_state(&ctx.machine.name, MachineState::Stopping);
    match ctx.driver.stop(&ctx.machine).await {
        Ok(()) => Ok(()),
        Err(e) if !e.is_fatal() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Step 6: best-effort route removal; failures are logged, not fatal.
async fn remove_route(ctx: &TaskRunContext, handle: &str) {
    let Some(rooter) = &ctx.rooter else { return };
    match rooter.remove(handle).await {
        Ok(()) => {
            send(
                &ctx.event_tx,
                Event::RouteRemoved {
                    task_id: ctx.task.id.clone(),
                },
            )
            .await;
        }
        Err(e) => {
            warn!(task = %ctx.task.id, handle, error = %e, "route removal failed");
        }
    }
}

async fn send(event_tx: &mpsc::Sender<Event>, event: Event) {
    if event_tx.send(event).await.is_err() {
        warn!("controller event channel closed");
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
