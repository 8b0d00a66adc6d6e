// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, recovery, shutdown.

use crate::config::{ConfigError, CuckooConfig};
use crate::event_bus::{EventBus, EventReader};
use cuckoo_core::{CuckooCwd, Event, RouteKind, SystemClock};
use cuckoo_engine::{
    AgentClient, Controller, ControllerConfig, ControllerDeps, EngineLauncher, NodeDispatcher,
    NullNodeDispatcher, RunnerSet, StagePools, StageSettings,
};
use cuckoo_engine::stages::{IdentificationRunner, PostRunner, PreRunner};
use cuckoo_machinery::{driver_from_name, load_machinery_conf, MachineryDriver, MachinePool};
use cuckoo_resultserver::{ResultServer, RunningTasks};
use cuckoo_rooter::RooterClient;
use cuckoo_storage::{load_snapshot, Checkpointer, MaterializedState, Wal};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Daemon with the production clock.
pub type DaemonController = Controller<SystemClock>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("machinery error: {0}")]
    Machinery(#[from] cuckoo_machinery::MachineryConfError),
    #[error("failed to acquire {0}: another orchestrator owns this cwd?")]
    LockFailed(String),
    #[error("WAL error: {0}")]
    Wal(#[from] cuckoo_storage::WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] cuckoo_storage::SnapshotError),
    #[error("result server error: {0}")]
    ResultServer(#[from] cuckoo_resultserver::ResultServerError),
    #[error("engine error: {0}")]
    Engine(#[from] cuckoo_engine::EngineError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup switches from the CLI.
pub struct StartupOptions {
    pub cwd: CuckooCwd,
    /// Load machinery and bind the result server (everything except a
    /// main-only `--distributed` process wants this).
    pub local_machinery: bool,
    /// Overrides `[state_control] cancel_abandoned` when set.
    pub cancel_abandoned_override: Option<bool>,
    /// Remote dispatch hook; `None` means single-node.
    pub node_dispatcher: Option<Arc<dyn NodeDispatcher>>,
}

/// A started daemon.
pub struct DaemonState {
    pub cwd: CuckooCwd,
    pub config: CuckooConfig,
    // NOTE(lifetime): Held to maintain the exclusive cwd lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub state: Arc<Mutex<MaterializedState>>,
    pub controller: Arc<DaemonController>,
    pub event_bus: EventBus,
    pub pool: MachinePool,
    pub results: RunningTasks,
    /// Where the result server actually listens (port 0 resolves here).
    pub resultserver_addr: Option<SocketAddr>,
    /// Channel components use to feed events into the bus.
    pub internal_tx: mpsc::Sender<Event>,
}

/// Everything `startup` hands back.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub event_reader: EventReader,
}

/// Boot a daemon over a working directory.
pub async fn startup(options: StartupOptions) -> Result<StartupResult, LifecycleError> {
    let cwd = options.cwd;

    // 1. Configuration first: refuse to boot on anything invalid.
    let config = CuckooConfig::load(&cwd.conf_file("cuckoo.toml"))?;

    // 2. Exclusive cwd lock before any state is touched.
    std::fs::create_dir_all(cwd.operational_dir())?;
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(cwd.pid_path())?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::LockFailed(cwd.pid_path().display().to_string()))?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // 3. Recover state: snapshot plus WAL tail.
    let (mut state, processed_seq) = match load_snapshot(&cwd.state_db_path())? {
        Some(snapshot) => {
            info!(
                seq = snapshot.seq,
                analyses = snapshot.state.analyses.len(),
                tasks = snapshot.state.tasks.len(),
                "loaded state snapshot"
            );
            (snapshot.state, snapshot.seq)
        }
        None => {
            info!("no snapshot, starting with empty state");
            (MaterializedState::default(), 0)
        }
    };

    let wal = Wal::open(&cwd.state_wal_path(), processed_seq)?;
    let replay = wal.entries_after(processed_seq)?;
    if !replay.is_empty() {
        info!(count = replay.len(), after = processed_seq, "replaying WAL entries");
    }
    for entry in &replay {
        state.apply_event(&entry.event);
    }
    let (event_bus, event_reader) = EventBus::new(wal);

    // 4. Machinery pool and drivers.
    let pool = MachinePool::new();
    let mut drivers: HashMap<String, Arc<dyn MachineryDriver>> = HashMap::new();
    if options.local_machinery {
        for name in &config.machineries {
            let conf = load_machinery_conf(&cwd.machinery_conf(name))?;
            // Unknown machinery names fail here, at startup.
            let driver = driver_from_name(&conf.kind, &conf)?;
            drivers.insert(conf.kind.clone(), driver);
            pool.register(conf.machines.clone());
            info!(machinery = %name, machines = conf.machines.len(), "machinery loaded");
        }
        for machine in pool.snapshot() {
            state.upsert_machine(machine);
        }
    }

    let state = Arc::new(Mutex::new(state));

    // 5. Internal event channel, forwarded into the WAL-backed bus.
    let (internal_tx, internal_rx) = mpsc::channel::<Event>(256);
    spawn_event_forwarder(internal_rx, event_bus.clone());

    // 6. Result server.
    let results = RunningTasks::new();
    let mut resultserver_addr = None;
    if options.local_machinery {
        let addr = SocketAddr::new(config.resultserver.listen_ip, config.resultserver.listen_port);
        let server =
            ResultServer::bind(addr, results.clone(), config.resultserver.max_frame_len).await?;
        resultserver_addr = server.local_addr().ok();
        tokio::spawn(server.run());
    }

    // 7. Rooter probe: the advertised route set gates routed tasks.
    let (rooter, available_routes) = probe_rooter(&cwd, config.network_routing.enabled).await;

    // 8. Stage pools.
    let stages = Arc::new(StagePools::new(
        StageSettings {
            identification_workers: config.workers.identification,
            pre_workers: config.workers.pre,
            post_workers: config.workers.post,
            identification_timeout: Duration::from_secs(config.workers.identification_timeout_secs),
            pre_timeout: Duration::from_secs(config.workers.pre_timeout_secs),
            post_timeout: Duration::from_secs(config.workers.post_timeout_secs),
        },
        Arc::new(IdentificationRunner),
        Arc::new(PreRunner {
            default_platforms: config.platform.default_platforms.clone(),
            default_browser: config.platform.default_browser.clone(),
        }),
        Arc::new(PostRunner::default()),
        internal_tx.clone(),
    ));

    // 9. Task launcher.
    let launcher = Arc::new(EngineLauncher {
        pool: pool.clone(),
        drivers,
        rooter,
        results: results.clone(),
        agent: AgentClient::new(),
        event_tx: internal_tx.clone(),
        epoch_ms: Arc::new(|| {
            use cuckoo_core::Clock;
            SystemClock.epoch_ms()
        }),
        runners: RunnerSet::new(),
    });

    // 10. The controller.
    let controller = Arc::new(Controller::new(
        Arc::clone(&state),
        cwd.clone(),
        SystemClock,
        pool.clone(),
        ControllerConfig {
            cancel_unidentified: config.state_control.cancel_unidentified,
            cancel_abandoned: options
                .cancel_abandoned_override
                .unwrap_or(config.state_control.cancel_abandoned),
            routing_enabled: config.network_routing.enabled,
            available_routes,
        },
        ControllerDeps {
            stages,
            launcher,
            nodes: options
                .node_dispatcher
                .unwrap_or_else(|| Arc::new(NullNodeDispatcher)),
        },
    ));

    // 11. Reconcile abandoned work from before the restart.
    let recovery_events = controller.recover()?;
    if !recovery_events.is_empty() {
        info!(count = recovery_events.len(), "recovery produced events");
        for event in recovery_events {
            if let Err(e) = event_bus.send(event) {
                warn!(error = %e, "failed to persist recovery event");
            }
        }
        event_bus.flush()?;
    }

    // 12. Pick up submissions that arrived while we were down.
    {
        let state_guard = state.lock();
        for event in scan_untracked(&cwd, &state_guard) {
            if let Err(e) = event_bus.send(event) {
                warn!(error = %e, "failed to enqueue untracked analysis");
            }
        }
    }
    event_bus.flush()?;

    info!("daemon started");
    Ok(StartupResult {
        daemon: DaemonState {
            cwd,
            config,
            lock_file,
            state,
            controller,
            event_bus,
            pool,
            results,
            resultserver_addr,
            internal_tx,
        },
        event_reader,
    })
}

/// Probe the rooter socket and fetch the advertised route set.
async fn probe_rooter(
    cwd: &CuckooCwd,
    enabled: bool,
) -> (Option<RooterClient>, BTreeSet<RouteKind>) {
    if !enabled {
        return (None, BTreeSet::new());
    }
    let client = RooterClient::new(cwd.rooter_socket());
    match client.list_routes().await {
        Ok(routes) => {
            info!(routes = ?routes, "rooter advertised routes");
            (Some(client), routes)
        }
        Err(e) => {
            // Routed tasks will fail fast until the rooter comes back and
            // the daemon restarts; unrouted tasks are unaffected.
            warn!(error = %e, "rooter unreachable, routed tasks will fail");
            (Some(client), BTreeSet::new())
        }
    }
}

/// Sentinels under `storage/untracked/` are submissions the controller
/// has not ingested yet. Markers for analyses that are already tracked
/// (crash between tracking and marker removal) are cleaned up here.
pub(crate) fn scan_untracked(cwd: &CuckooCwd, state: &MaterializedState) -> Vec<Event> {
    let mut events = Vec::new();
    let Ok(entries) = std::fs::read_dir(cwd.untracked_dir()) else {
        return events;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !cuckoo_core::AnalysisId::is_valid(name) {
            warn!(marker = %name, "ignoring malformed untracked marker");
            continue;
        }
        let id = cuckoo_core::AnalysisId::new(name);
        if state.analyses.contains_key(&id) {
            let _ = std::fs::remove_file(entry.path());
            continue;
        }
        events.push(Event::TrackNew { id });
    }
    events
}

impl DaemonState {
    /// Enqueue `analysis:tracknew` for any fresh submissions on disk.
    /// Called periodically by the run loop so submissions made while the
    /// daemon runs are ingested.
    pub fn enqueue_untracked(&self) {
        let events = {
            let state = self.state.lock();
            scan_untracked(&self.cwd, &state)
        };
        for event in events {
            if let Err(e) = self.event_bus.send(event) {
                warn!(error = %e, "failed to enqueue untracked analysis");
            }
        }
    }

    /// Process one event through the controller; result events are
    /// persisted and handled on later loop iterations (single delivery).
    pub fn process_event(&self, event: Event) -> Result<(), LifecycleError> {
        let result_events = self.controller.handle_event(event)?;
        for event in result_events {
            if let Err(e) = self.event_bus.send(event) {
                warn!(error = %e, "failed to persist controller result event");
            }
        }
        Ok(())
    }

    /// Graceful shutdown: flush the WAL, save a final snapshot, drop the
    /// pid file.
    pub fn shutdown(&self) -> Result<(), LifecycleError> {
        info!("shutting down");
        if let Err(e) = self.event_bus.flush() {
            warn!(error = %e, "failed to flush WAL on shutdown");
        }

        let processed_seq = self.event_bus.processed_seq();
        if processed_seq > 0 {
            let state = self.state.lock().clone();
            let checkpointer = Checkpointer::new(self.cwd.state_db_path());
            match checkpointer.checkpoint_sync(processed_seq, &state) {
                Ok(result) => info!(seq = result.seq, bytes = result.size_bytes, "final snapshot"),
                Err(e) => warn!(error = %e, "failed to save shutdown snapshot"),
            }
        }

        if self.cwd.pid_path().exists() {
            if let Err(e) = std::fs::remove_file(self.cwd.pid_path()) {
                warn!(error = %e, "failed to remove pid file");
            }
        }
        info!("shutdown complete");
        Ok(())
    }
}

/// Forward component events into the WAL-backed bus, flushing per batch.
fn spawn_event_forwarder(mut rx: mpsc::Receiver<Event>, event_bus: EventBus) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event_bus.send(event).is_err() {
                warn!("failed to forward event to WAL");
                continue;
            }
            while let Ok(event) = rx.try_recv() {
                if event_bus.send(event).is_err() {
                    warn!("failed to forward event to WAL");
                }
            }
            if let Err(e) = event_bus.flush() {
                tracing::error!(error = %e, "failed to flush forwarded events");
            }
        }
    });
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
