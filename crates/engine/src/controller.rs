// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller: central serial state machine of the orchestrator.
//!
//! The controller consumes one ordered event stream. For each event it
//! advances analyses and tasks through their state machines and returns
//! the result events that persist those transitions; the daemon writes
//! them to the WAL and feeds them back through the loop, so every row
//! mutation is durable before downstream work observes it. Side effects
//! (stage dispatch, runner launch, remote dispatch) go through injected
//! dependencies, keeping the controller the sole mutator and testable
//! with fakes.

use crate::error::EngineError;
use crate::runner::Payload;
use crate::scheduler;
use crate::stages::StageRequest;
use cuckoo_core::{
    Analysis, AnalysisId, AnalysisState, Clock, CuckooCwd, ErrorKind, Event, Machine, NodeName,
    Stage, StageOutcome, StageReport, Task, TaskId, TaskOutcome, TaskState,
};
use cuckoo_machinery::MachinePool;
use cuckoo_storage::MaterializedState;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Dispatches stage jobs onto worker pools.
pub trait StageDispatcher: Send + Sync {
    fn dispatch(&self, request: StageRequest);
}

impl StageDispatcher for crate::stages::StagePools {
    fn dispatch(&self, request: StageRequest) {
        crate::stages::StagePools::dispatch(self, request);
    }
}

/// Launches and cancels task runners.
pub trait TaskLauncher: Send + Sync {
    fn launch(&self, task: Task, machine: Machine, payload: Payload, task_dir: PathBuf);
    /// Returns false when no live runner exists for the task.
    fn cancel(&self, task_id: &TaskId) -> bool;
}

/// Hands tasks to remote task-running nodes.
pub trait NodeDispatcher: Send + Sync {
    fn dispatch(&self, task: Task, node: NodeName);
}

/// Single-node deployments have nowhere to dispatch to.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNodeDispatcher;

impl NodeDispatcher for NullNodeDispatcher {
    fn dispatch(&self, task: Task, node: NodeName) {
        warn!(task = %task.id, node = %node, "no node dispatcher configured");
    }
}

/// Behavior switches from `conf/cuckoo.toml`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Cancel analyses whose target cannot be identified.
    pub cancel_unidentified: bool,
    /// Cancel-and-release abandoned tasks at startup (the default) instead
    /// of re-reserving their machines and re-running them.
    pub cancel_abandoned: bool,
    /// Whether per-task network routing is active at all.
    pub routing_enabled: bool,
    /// Routes the rooter advertised at startup. Empty when routing is
    /// enabled but the rooter was unreachable: every routed task then
    /// fails before reserving a machine.
    pub available_routes: BTreeSet<cuckoo_core::RouteKind>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cancel_unidentified: true,
            cancel_abandoned: true,
            routing_enabled: false,
            available_routes: BTreeSet::new(),
        }
    }
}

/// Side-effect collaborators, injectable for tests.
pub struct ControllerDeps {
    pub stages: Arc<dyn StageDispatcher>,
    pub launcher: Arc<dyn TaskLauncher>,
    pub nodes: Arc<dyn NodeDispatcher>,
}

/// The serial controller.
pub struct Controller<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    cwd: CuckooCwd,
    clock: C,
    pool: MachinePool,
    config: ControllerConfig,
    stages: Arc<dyn StageDispatcher>,
    launcher: Arc<dyn TaskLauncher>,
    /// Swappable: the distributed node set is wired up after startup,
    /// once the daemon's state and event channel exist.
    nodes: Mutex<Arc<dyn NodeDispatcher>>,
    /// Tasks handed to a runner or a node whose `task:assigned` event has
    /// not necessarily been applied yet. Guards the scheduling sweep
    /// against launching the same task twice.
    in_flight: Mutex<HashSet<TaskId>>,
}

impl<C: Clock> Controller<C> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        cwd: CuckooCwd,
        clock: C,
        pool: MachinePool,
        config: ControllerConfig,
        deps: ControllerDeps,
    ) -> Self {
        Self {
            state,
            cwd,
            clock,
            pool,
            config,
            stages: deps.stages,
            launcher: deps.launcher,
            nodes: Mutex::new(deps.nodes),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &MachinePool {
        &self.pool
    }

    /// Install the remote dispatch hook (distributed mode wiring).
    pub fn set_node_dispatcher(&self, nodes: Arc<dyn NodeDispatcher>) {
        *self.nodes.lock() = nodes;
    }

    /// Handle one event. The caller has already applied it to the
    /// materialized state; returned events are persisted and fed back.
    pub fn handle_event(&self, event: Event) -> Result<Vec<Event>, EngineError> {
        match event {
            Event::TrackNew { id } => self.track_new(id),
            Event::AnalysisTracked { analysis } => {
                self.dispatch_stage(Stage::Identification, &analysis.id, None)?;
                Ok(Vec::new())
            }
            Event::AnalysisStateChanged { id, state } => self.on_analysis_state(id, state),
            Event::ManualSelected { id, .. } => self.on_manual_selected(id),
            Event::StageComplete {
                stage,
                analysis_id,
                task_id,
                outcome,
            } => self.on_stage_complete(stage, analysis_id, task_id, outcome),
            Event::TaskCreated { .. } => Ok(self.schedule()),
            Event::TaskStateChanged { id, state } => self.on_task_state(id, state),
            Event::TaskFinished { id, outcome } => self.on_task_finished(id, outcome),
            Event::TaskCancel { id } => self.on_task_cancel(id),
            Event::MachineGone { name, reason } => {
                self.pool.disable(&name, &reason);
                Ok(Vec::new())
            }
            Event::NodeMachines { .. } => Ok(self.schedule()),
            // Remaining events are pure bookkeeping; the state store has
            // already recorded them.
            Event::AnalysisScored { .. }
            | Event::AnalysisError { .. }
            | Event::TaskAssigned { .. }
            | Event::TaskError { .. }
            | Event::TaskScored { .. }
            | Event::NodeDisconnected { .. }
            | Event::NodeTaskDispatched { .. }
            | Event::RouteApplied { .. }
            | Event::RouteRemoved { .. }
            | Event::Shutdown => Ok(Vec::new()),
        }
    }

    // -- submission intake --

    /// Load an untracked analysis from disk and bring it under control.
    fn track_new(&self, id: AnalysisId) -> Result<Vec<Event>, EngineError> {
        let analysis_json = self.cwd.analysis_dir(&id).join("analysis.json");
        let raw = std::fs::read(&analysis_json).map_err(|e| EngineError::AnalysisLoad {
            id: id.clone(),
            message: e.to_string(),
        })?;
        let mut analysis: Analysis =
            serde_json::from_slice(&raw).map_err(|e| EngineError::AnalysisLoad {
                id: id.clone(),
                message: e.to_string(),
            })?;

        analysis.state = AnalysisState::PendingIdentification;

        // The sentinel's job is done once the row exists.
        let marker = self.cwd.untracked_marker(&id);
        if let Err(e) = std::fs::remove_file(&marker) {
            warn!(analysis = %id, error = %e, "could not remove untracked marker");
        }

        info!(analysis = %id, target = %analysis.target.describe(), "tracking new analysis");
        Ok(vec![Event::AnalysisTracked {
            analysis: Box::new(analysis),
        }])
    }

    // -- stage completions --

    fn on_stage_complete(
        &self,
        stage: Stage,
        analysis_id: AnalysisId,
        task_id: Option<TaskId>,
        outcome: StageOutcome,
    ) -> Result<Vec<Event>, EngineError> {
        match (stage, outcome) {
            (Stage::Identification, StageOutcome::Completed { report }) => {
                self.on_identified(analysis_id, report)
            }
            (Stage::Pre, StageOutcome::Completed { report }) => {
                self.on_pre_done(analysis_id, report)
            }
            (Stage::Post, StageOutcome::Completed { report }) => {
                self.on_post_done(analysis_id, task_id, report)
            }
            (Stage::Post, StageOutcome::Failed { fault }) => {
                let Some(task_id) = task_id else {
                    return Err(EngineError::PostWithoutTask(analysis_id));
                };
                let mut events = vec![
                    Event::TaskError {
                        id: task_id.clone(),
                        stage: stage.as_str().to_string(),
                        message: fault.to_string(),
                    },
                    Event::TaskStateChanged {
                        id: task_id,
                        state: TaskState::Failed,
                    },
                ];
                events.extend(self.completion_check(&analysis_id));
                Ok(events)
            }
            // Identification or pre failing is fatal for the analysis;
            // task failures never are.
            (stage, StageOutcome::Failed { fault }) => Ok(vec![
                Event::AnalysisError {
                    id: analysis_id.clone(),
                    stage: stage.as_str().to_string(),
                    message: fault.to_string(),
                },
                Event::AnalysisStateChanged {
                    id: analysis_id,
                    state: AnalysisState::FatalError,
                },
            ]),
        }
    }

    fn on_identified(
        &self,
        id: AnalysisId,
        report: StageReport,
    ) -> Result<Vec<Event>, EngineError> {
        let StageReport::Identification(identification) = report else {
            return Ok(Vec::new());
        };

        if identification.file_type == "unknown" && self.config.cancel_unidentified {
            return Ok(vec![
                Event::AnalysisError {
                    id: id.clone(),
                    stage: Stage::Identification.as_str().to_string(),
                    message: "target could not be identified".to_string(),
                },
                Event::AnalysisStateChanged {
                    id,
                    state: AnalysisState::FatalError,
                },
            ]);
        }

        let manual = {
            let state = self.state.lock();
            state
                .analysis(&id)
                .map(|a| a.settings.manual)
                .unwrap_or(false)
        };

        let next = if manual {
            AnalysisState::WaitingManual
        } else {
            AnalysisState::PendingPre
        };
        Ok(vec![Event::AnalysisStateChanged { id, state: next }])
    }

    fn on_manual_selected(&self, id: AnalysisId) -> Result<Vec<Event>, EngineError> {
        let current = self.state.lock().analysis_state(&id);
        match current {
            Some(AnalysisState::WaitingManual) => Ok(vec![Event::AnalysisStateChanged {
                id,
                state: AnalysisState::PendingPre,
            }]),
            Some(other) => {
                warn!(analysis = %id, state = %other, "manual selection ignored");
                Ok(Vec::new())
            }
            None => Err(EngineError::AnalysisNotFound(id)),
        }
    }

    fn on_analysis_state(
        &self,
        id: AnalysisId,
        state: AnalysisState,
    ) -> Result<Vec<Event>, EngineError> {
        match state {
            AnalysisState::PendingPre => {
                self.dispatch_stage(Stage::Pre, &id, None)?;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn on_pre_done(&self, id: AnalysisId, report: StageReport) -> Result<Vec<Event>, EngineError> {
        let StageReport::Pre(pre) = report else {
            return Ok(Vec::new());
        };

        if pre.platforms.is_empty() {
            return Ok(vec![
                Event::AnalysisError {
                    id: id.clone(),
                    stage: Stage::Pre.as_str().to_string(),
                    message: "pre-analysis selected no platforms".to_string(),
                },
                Event::AnalysisStateChanged {
                    id,
                    state: AnalysisState::FatalError,
                },
            ]);
        }

        let (settings, now_ms) = {
            let state = self.state.lock();
            let analysis = state
                .analysis(&id)
                .ok_or_else(|| EngineError::AnalysisNotFound(id.clone()))?;
            (analysis.settings.clone(), self.clock.epoch_ms())
        };

        let mut events = Vec::new();
        for (n, platform) in pre.platforms.into_iter().enumerate() {
            let task = Task::new(
                TaskId::for_analysis(&id, n as u32 + 1),
                id.clone(),
                platform,
                settings.priority,
                settings.timeout,
                settings.route.clone(),
                now_ms,
            );
            events.push(Event::TaskCreated {
                task: Box::new(task),
            });
        }
        events.push(Event::AnalysisStateChanged {
            id,
            state: AnalysisState::TasksPending,
        });
        Ok(events)
    }

    fn on_post_done(
        &self,
        analysis_id: AnalysisId,
        task_id: Option<TaskId>,
        report: StageReport,
    ) -> Result<Vec<Event>, EngineError> {
        let StageReport::Post(post) = report else {
            return Ok(Vec::new());
        };
        let Some(task_id) = task_id else {
            return Err(EngineError::PostWithoutTask(analysis_id));
        };

        let mut events = vec![
            Event::TaskScored {
                id: task_id.clone(),
                score: post.score,
                families: post.families,
            },
            Event::TaskStateChanged {
                id: task_id,
                state: TaskState::Reported,
            },
        ];
        events.extend(self.completion_check(&analysis_id));
        Ok(events)
    }

    // -- task lifecycle --

    fn on_task_finished(
        &self,
        id: TaskId,
        outcome: TaskOutcome,
    ) -> Result<Vec<Event>, EngineError> {
        self.in_flight.lock().remove(&id);
        let analysis_id = id.analysis_id();
        let mut events = match outcome {
            TaskOutcome::Detonated { timed_out } => {
                let mut events = Vec::new();
                if timed_out {
                    events.push(Event::TaskError {
                        id: id.clone(),
                        stage: "task".to_string(),
                        message: "timeout".to_string(),
                    });
                }
                events.push(Event::TaskStateChanged {
                    id,
                    state: TaskState::PendingPost,
                });
                events
            }
            TaskOutcome::Failed { fault } => {
                let mut events = vec![
                    Event::TaskError {
                        id: id.clone(),
                        stage: "task".to_string(),
                        message: fault.to_string(),
                    },
                    Event::TaskStateChanged {
                        id,
                        state: TaskState::Failed,
                    },
                ];
                events.extend(self.completion_check(&analysis_id));
                events
            }
            TaskOutcome::Cancelled => {
                let mut events = vec![Event::TaskStateChanged {
                    id,
                    state: TaskState::Cancelled,
                }];
                events.extend(self.completion_check(&analysis_id));
                events
            }
        };

        // The machine is free again; another pending task may fit it.
        events.extend(self.schedule());
        Ok(events)
    }

    fn on_task_state(&self, id: TaskId, state: TaskState) -> Result<Vec<Event>, EngineError> {
        match state {
            TaskState::PendingPost => {
                let analysis_id = id.analysis_id();
                self.dispatch_stage(Stage::Post, &analysis_id, Some(id))?;
                Ok(Vec::new())
            }
            // A task re-entering the queue (startup recovery) wants a
            // scheduling sweep.
            TaskState::Pending => Ok(self.schedule()),
            s if s.is_terminal() => Ok(self.completion_check(&id.analysis_id())),
            _ => Ok(Vec::new()),
        }
    }

    fn on_task_cancel(&self, id: TaskId) -> Result<Vec<Event>, EngineError> {
        let task_state = {
            let state = self.state.lock();
            state.task(&id).map(|t| (t.state, t.machine.clone()))
        };
        let Some((task_state, machine)) = task_state else {
            return Err(EngineError::TaskNotFound(id));
        };

        match task_state {
            TaskState::Pending => {
                let mut events = vec![Event::TaskStateChanged {
                    id: id.clone(),
                    state: TaskState::Cancelled,
                }];
                events.extend(self.completion_check(&id.analysis_id()));
                Ok(events)
            }
            s if s.holds_machine() => {
                if self.launcher.cancel(&id) {
                    // The runner unwinds and emits task:finished itself.
                    Ok(Vec::new())
                } else {
                    // No live runner: release directly.
                    self.in_flight.lock().remove(&id);
                    if let Some(machine) = machine {
                        self.pool.release(&machine, self.clock.epoch_ms(), None);
                    }
                    let mut events = vec![Event::TaskStateChanged {
                        id: id.clone(),
                        state: TaskState::Cancelled,
                    }];
                    events.extend(self.completion_check(&id.analysis_id()));
                    Ok(events)
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Once every task of an analysis is terminal, the analysis finishes.
    /// Failed tasks do not fail the analysis; the score is the maximum
    /// task score and families are the union.
    fn completion_check(&self, analysis_id: &AnalysisId) -> Vec<Event> {
        let state = self.state.lock();
        let Some(analysis) = state.analysis(analysis_id) else {
            return Vec::new();
        };
        if analysis.state != AnalysisState::TasksPending || analysis.task_ids.is_empty() {
            return Vec::new();
        }
        let tasks = state.tasks_of(analysis_id);
        if !tasks.iter().all(|t| t.state.is_terminal()) {
            return Vec::new();
        }

        let score = tasks.iter().map(|t| t.score).max().unwrap_or(0);
        let mut families: Vec<String> = Vec::new();
        for task in &tasks {
            for family in &task.families {
                if !families.contains(family) {
                    families.push(family.clone());
                }
            }
        }

        vec![
            Event::AnalysisScored {
                id: analysis_id.clone(),
                score,
                families,
            },
            Event::AnalysisStateChanged {
                id: analysis_id.clone(),
                state: AnalysisState::Finished,
            },
        ]
    }

    // -- scheduling --

    /// One scheduling sweep over the pending queue.
    pub fn schedule(&self) -> Vec<Event> {
        let pending: Vec<Task> = {
            let state = self.state.lock();
            let in_flight = self.in_flight.lock();
            state
                .pending_tasks()
                .into_iter()
                .filter(|t| !in_flight.contains(&t.id))
                .cloned()
                .collect()
        };
        let mut events = Vec::new();

        for task in pending {
            events.extend(self.schedule_task(task));
        }
        events
    }

    fn schedule_task(&self, task: Task) -> Vec<Event> {
        // Routed tasks fail fast when their route cannot be served; the
        // machine is never reserved.
        if task.route.needs_rooter() {
            let unavailable = !self.config.routing_enabled
                || !task.route.is_available(&self.config.available_routes);
            if unavailable {
                let message = if self.config.routing_enabled {
                    format!("route {} is not available", task.route)
                } else {
                    "network routing is disabled".to_string()
                };
                let mut events = vec![
                    Event::TaskError {
                        id: task.id.clone(),
                        stage: "task".to_string(),
                        message: format!("{}: {message}", ErrorKind::RouteError),
                    },
                    Event::TaskStateChanged {
                        id: task.id.clone(),
                        state: TaskState::Failed,
                    },
                ];
                events.extend(self.completion_check(&task.analysis_id));
                return events;
            }
        }

        // Local machines first.
        if let Some(machine) =
            self.pool
                .acquire(&task.platform, &task.os_version, &task.required_tags, &task.id)
        {
            return self.launch_local(task, machine);
        }

        // Then remote nodes that advertise a candidate with free slots.
        let remote = {
            let state = self.state.lock();
            scheduler::remote_candidate(&task, &state.nodes, &state.node_tasks)
        };
        if let Some(candidate) = remote {
            info!(
                task = %task.id,
                node = %candidate.node,
                machine = %candidate.machine.name,
                "dispatching task to remote node"
            );
            let events = vec![
                Event::TaskAssigned {
                    id: task.id.clone(),
                    machine: candidate.machine.name.clone(),
                    node: Some(candidate.node.clone()),
                },
                Event::NodeTaskDispatched {
                    task_id: task.id.clone(),
                    node: candidate.node.clone(),
                },
            ];
            self.in_flight.lock().insert(task.id.clone());
            self.nodes.lock().clone().dispatch(task, candidate.node);
            return events;
        }

        // One full sweep over everything registered: a requirement nothing
        // can ever satisfy fails now instead of queueing forever.
        let locally_satisfiable =
            self.pool
                .any_machine_matches(&task.platform, &task.os_version, &task.required_tags);
        let remotely_satisfiable = {
            let state = self.state.lock();
            scheduler::any_remote_matches(&task, &state.nodes)
        };
        if !locally_satisfiable && !remotely_satisfiable {
            let mut events = vec![
                Event::TaskError {
                    id: task.id.clone(),
                    stage: "task".to_string(),
                    message: format!(
                        "{}: no machine with platform {}/{} and tags {:?}",
                        ErrorKind::NoMatchingMachine,
                        task.platform,
                        task.os_version,
                        task.required_tags
                    ),
                },
                Event::TaskStateChanged {
                    id: task.id.clone(),
                    state: TaskState::Failed,
                },
            ];
            events.extend(self.completion_check(&task.analysis_id));
            return events;
        }

        // Satisfiable but currently busy: stay pending.
        Vec::new()
    }

    fn launch_local(&self, mut task: Task, machine: Machine) -> Vec<Event> {
        let payload = match self.payload_for(&task.analysis_id) {
            Ok(payload) => payload,
            Err(e) => {
                self.pool.release(&machine.name, self.clock.epoch_ms(), None);
                let mut events = vec![
                    Event::TaskError {
                        id: task.id.clone(),
                        stage: "task".to_string(),
                        message: e.to_string(),
                    },
                    Event::TaskStateChanged {
                        id: task.id.clone(),
                        state: TaskState::Failed,
                    },
                ];
                events.extend(self.completion_check(&task.analysis_id));
                return events;
            }
        };

        let task_dir = self.cwd.task_dir(&task.id);
        if let Err(e) = std::fs::create_dir_all(&task_dir) {
            warn!(task = %task.id, error = %e, "cannot create task directory");
        }

        let events = vec![Event::TaskAssigned {
            id: task.id.clone(),
            machine: machine.name.clone(),
            node: None,
        }];

        task.machine = Some(machine.name.clone());
        task.state = TaskState::Assigned;
        info!(task = %task.id, machine = %machine.name, "task assigned");
        self.in_flight.lock().insert(task.id.clone());
        self.launcher.launch(task, machine, payload, task_dir);
        events
    }

    fn payload_for(&self, analysis_id: &AnalysisId) -> Result<Payload, EngineError> {
        let state = self.state.lock();
        let analysis = state
            .analysis(analysis_id)
            .ok_or_else(|| EngineError::AnalysisNotFound(analysis_id.clone()))?;
        match &analysis.target {
            cuckoo_core::TargetDescriptor::File {
                filename, sha256, ..
            } => {
                let store =
                    cuckoo_storage::BinaryStore::new(self.cwd.binaries_dir());
                Ok(Payload::File {
                    filename: analysis
                        .settings
                        .orig_filename
                        .clone()
                        .unwrap_or_else(|| filename.clone()),
                    path: store.path_of(sha256),
                })
            }
            cuckoo_core::TargetDescriptor::Url { url } => Ok(Payload::Url { url: url.clone() }),
        }
    }

    // -- startup recovery --

    /// Reconcile state after a restart: abandoned tasks are cancelled and
    /// their machines released (default), or re-reserved and re-run when
    /// `cancel_abandoned` is off. Stages for live analyses are
    /// re-dispatched; artifact caching keeps that idempotent.
    pub fn recover(&self) -> Result<Vec<Event>, EngineError> {
        let mut events = Vec::new();

        let (abandoned, live, pending_post): (Vec<Task>, Vec<Analysis>, Vec<Task>) = {
            let state = self.state.lock();
            (
                state.abandoned_tasks().into_iter().cloned().collect(),
                state.live_analyses().into_iter().cloned().collect(),
                state
                    .tasks
                    .values()
                    .filter(|t| t.state == TaskState::PendingPost)
                    .cloned()
                    .collect(),
            )
        };

        for task in abandoned {
            if self.config.cancel_abandoned {
                info!(task = %task.id, "cancelling abandoned task");
                if let Some(machine) = &task.machine {
                    self.pool.release(machine, self.clock.epoch_ms(), None);
                }
                events.push(Event::TaskError {
                    id: task.id.clone(),
                    stage: "task".to_string(),
                    message: "abandoned by restart".to_string(),
                });
                events.push(Event::TaskStateChanged {
                    id: task.id.clone(),
                    state: TaskState::Cancelled,
                });
                events.extend(self.completion_check(&task.analysis_id));
            } else {
                // Resume: put the task back in the queue; the scheduler
                // re-reserves a machine and a fresh runner restores from
                // snapshot.
                info!(task = %task.id, "re-queueing abandoned task");
                if let Some(machine) = &task.machine {
                    self.pool.release(machine, self.clock.epoch_ms(), None);
                }
                events.push(Event::TaskStateChanged {
                    id: task.id.clone(),
                    state: TaskState::Pending,
                });
            }
        }

        for analysis in live {
            match analysis.state {
                AnalysisState::PendingIdentification => {
                    self.dispatch_stage(Stage::Identification, &analysis.id, None)?;
                }
                AnalysisState::PendingPre => {
                    self.dispatch_stage(Stage::Pre, &analysis.id, None)?;
                }
                _ => {}
            }
        }

        for task in pending_post {
            self.dispatch_stage(Stage::Post, &task.analysis_id, Some(task.id))?;
        }

        events.extend(self.schedule());
        Ok(events)
    }

    // -- helpers --

    fn dispatch_stage(
        &self,
        stage: Stage,
        analysis_id: &AnalysisId,
        task_id: Option<TaskId>,
    ) -> Result<(), EngineError> {
        let (analysis, task) = {
            let state = self.state.lock();
            let analysis = state
                .analysis(analysis_id)
                .cloned()
                .ok_or_else(|| EngineError::AnalysisNotFound(analysis_id.clone()))?;
            // Per-task stages get the task row snapshot: post-processing
            // aggregates its recorded errors (timeouts included).
            let task = match &task_id {
                Some(id) => Some(
                    state
                        .task(id)
                        .cloned()
                        .ok_or_else(|| EngineError::TaskNotFound(id.clone()))?,
                ),
                None => None,
            };
            (analysis, task)
        };

        let binary_path = match &analysis.target {
            cuckoo_core::TargetDescriptor::File { sha256, .. } => Some(
                cuckoo_storage::BinaryStore::new(self.cwd.binaries_dir()).path_of(sha256),
            ),
            cuckoo_core::TargetDescriptor::Url { .. } => None,
        };

        let task_dir = task_id.as_ref().map(|id| self.cwd.task_dir(id));
        self.stages.dispatch(StageRequest {
            stage,
            analysis,
            task_id,
            task,
            analysis_dir: self.cwd.analysis_dir(analysis_id),
            task_dir,
            binary_path,
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
