// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The privileged rooter server.
//!
//! Listens on a Unix socket, accepts connections from the unprivileged
//! orchestrator, and serializes all route mutations behind one async
//! mutex, so rooter state stays single-writer. Successful applies return an
//! opaque handle the client must quote on remove; removal is idempotent.

use crate::actions::{
    execute_plan, execute_undo, plan_route, Cmd, CommandRunner, RoutingConf, ToolPaths,
};
use crate::protocol::{read_line_json, write_line_json, Request, Response, RooterOp};
use serde_json::json;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RooterServerError {
    #[error("failed to bind socket at {path}: {err}", path = .0.display(), err = .1)]
    BindFailed(PathBuf, std::io::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Routes applied and not yet removed, by handle.
type HandleTable = HashMap<String, Vec<Cmd>>;

/// The rooter server state shared across connections.
pub struct RooterServer {
    listener: UnixListener,
    conf: RoutingConf,
    tools: ToolPaths,
    runner: Arc<dyn CommandRunner>,
    /// Serializes every mutation; rooter state is single-writer.
    handles: Arc<Mutex<HandleTable>>,
    next_handle: AtomicU64,
}

impl RooterServer {
    /// Bind the socket, replacing a stale one, and restrict permissions to
    /// owner+group read/write. An optional group name is applied with
    /// chgrp so the unprivileged orchestrator's group can connect.
    pub async fn bind(
        socket_path: &Path,
        group: Option<&str>,
        conf: RoutingConf,
        tools: ToolPaths,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, RooterServerError> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| RooterServerError::BindFailed(socket_path.to_path_buf(), e))?;

        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660))?;
        if let Some(group) = group {
            let socket = socket_path.display().to_string();
            if let Err(e) = runner
                .run(Path::new("/usr/bin/chgrp"), &[group.to_string(), socket])
                .await
            {
                warn!(group, error = %e, "failed to set socket group");
            }
        }

        info!(
            socket = %socket_path.display(),
            routes = ?conf.available_routes(),
            "rooter listening"
        );

        Ok(Self {
            listener,
            conf,
            tools,
            runner,
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Accept loop. Each connection is served on its own task; mutations
    /// still serialize on the handle-table mutex.
    pub async fn run(self) {
        let server = Arc::new(self);
        loop {
            match server.listener.accept().await {
                Ok((stream, _)) => {
                    let server = Arc::clone(&server);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            debug!(error = %e, "rooter connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "rooter accept failed");
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: UnixStream,
    ) -> Result<(), crate::protocol::ProtocolError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let request: Request = match read_line_json(&mut reader).await {
                Ok(request) => request,
                Err(crate::protocol::ProtocolError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            let response = self.handle_request(request).await;
            write_line_json(&mut write_half, &response).await?;
        }
    }

    async fn handle_request(&self, request: Request) -> Response {
        match request.op {
            RooterOp::Ping => Response::ok(request.id, json!({"pong": true})),
            RooterOp::ListRoutes => Response::ok(
                request.id,
                json!({
                    "routes": self.conf.available_routes(),
                    "countries": self.conf.vpn_countries(),
                }),
            ),
            RooterOp::Apply => self.apply(request).await,
            RooterOp::Remove => self.remove(request).await,
        }
    }

    async fn apply(&self, request: Request) -> Response {
        let (Some(route), Some(source_ip)) = (&request.args.route, request.args.source_ip) else {
            return Response::err(request.id, "apply needs route and source_ip");
        };

        let handle = format!("r-{}", self.next_handle.fetch_add(1, Ordering::SeqCst));
        let plan = match plan_route(route, source_ip, &handle, &self.conf, &self.tools) {
            Ok(plan) => plan,
            Err(e) => return Response::err(request.id, e.to_string()),
        };

        // Hold the table lock through execution: one mutation at a time.
        let mut handles = self.handles.lock().await;
        if let Err(e) = execute_plan(self.runner.as_ref(), &plan).await {
            return Response::err(request.id, e.to_string());
        }
        handles.insert(handle.clone(), plan.undo);

        info!(%handle, route = %route, %source_ip, "route applied");
        Response::ok(request.id, json!({"handle": handle}))
    }

    async fn remove(&self, request: Request) -> Response {
        let Some(handle) = &request.args.handle else {
            return Response::err(request.id, "remove needs a handle");
        };

        let mut handles = self.handles.lock().await;
        match handles.remove(handle) {
            Some(undo) => {
                execute_undo(self.runner.as_ref(), &undo).await;
                info!(%handle, "route removed");
            }
            // Unknown handle: already removed. Idempotent by contract.
            None => debug!(%handle, "remove of unknown handle"),
        }
        Response::ok(request.id, json!({}))
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
