// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the rooter protocol, used by the task runner.
//!
//! One connection per request keeps the client stateless across rooter
//! restarts. Every mutation carries a 10-second wall timeout.

use crate::protocol::{
    read_line_json, write_line_json, ProtocolError, Request, RequestArgs, Response, RooterOp,
};
use cuckoo_core::{ErrorKind, Fault, Route, RouteKind};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::UnixStream;

/// Wall timeout for rooter mutations.
pub const ROOTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RooterClientError {
    #[error("rooter socket {path} is not reachable: {err}", path = .0.display(), err = .1)]
    Unreachable(PathBuf, std::io::Error),
    #[error("rooter protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("rooter request timed out after {}s", ROOTER_TIMEOUT.as_secs())]
    Timeout,
    #[error("rooter refused: {0}")]
    Refused(String),
    #[error("rooter answered request {expected} with id {got}")]
    IdMismatch { expected: u64, got: u64 },
}

impl RooterClientError {
    /// Route failures are route errors in the orchestrator-wide taxonomy.
    pub fn to_fault(&self) -> Fault {
        Fault::new(ErrorKind::RouteError, self.to_string())
    }
}

/// Client handle; cheap to clone, no persistent connection.
#[derive(Debug, Clone)]
pub struct RooterClient {
    socket_path: PathBuf,
    next_id: std::sync::Arc<AtomicU64>,
}

impl RooterClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        }
    }

    async fn call(&self, op: RooterOp, args: RequestArgs) -> Result<Response, RooterClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request { id, op, args };

        let exchange = async {
            let stream = UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| RooterClientError::Unreachable(self.socket_path.clone(), e))?;
            let (read_half, mut write_half) = stream.into_split();
            write_line_json(&mut write_half, &request).await?;
            let mut reader = BufReader::new(read_half);
            let response: Response = read_line_json(&mut reader).await?;
            Ok::<Response, RooterClientError>(response)
        };

        let response = tokio::time::timeout(ROOTER_TIMEOUT, exchange)
            .await
            .map_err(|_| RooterClientError::Timeout)??;

        if response.id != id {
            return Err(RooterClientError::IdMismatch {
                expected: id,
                got: response.id,
            });
        }
        if !response.ok {
            return Err(RooterClientError::Refused(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(response)
    }

    pub async fn ping(&self) -> Result<(), RooterClientError> {
        self.call(RooterOp::Ping, RequestArgs::default()).await?;
        Ok(())
    }

    /// Route kinds the rooter advertises.
    pub async fn list_routes(&self) -> Result<BTreeSet<RouteKind>, RooterClientError> {
        let response = self
            .call(RooterOp::ListRoutes, RequestArgs::default())
            .await?;
        let routes = response
            .data
            .as_ref()
            .and_then(|d| d.get("routes"))
            .cloned()
            .unwrap_or_default();
        Ok(serde_json::from_value(routes).unwrap_or_default())
    }

    /// Apply a route for a guest IP; the returned handle must be quoted
    /// on remove.
    pub async fn apply(
        &self,
        route: &Route,
        source_ip: IpAddr,
    ) -> Result<String, RooterClientError> {
        let response = self
            .call(
                RooterOp::Apply,
                RequestArgs {
                    route: Some(route.clone()),
                    source_ip: Some(source_ip),
                    handle: None,
                },
            )
            .await?;
        let handle = response
            .data
            .as_ref()
            .and_then(|d| d.get("handle"))
            .and_then(|h| h.as_str())
            .unwrap_or_default()
            .to_string();
        if handle.is_empty() {
            return Err(RooterClientError::Refused(
                "apply returned no handle".to_string(),
            ));
        }
        Ok(handle)
    }

    /// Remove a previously applied route. Safe to repeat.
    pub async fn remove(&self, handle: &str) -> Result<(), RooterClientError> {
        self.call(
            RooterOp::Remove,
            RequestArgs {
                route: None,
                source_ip: None,
                handle: Some(handle.to_string()),
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
