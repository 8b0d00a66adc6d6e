// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the in-guest agent.
//!
//! The agent is a small HTTP listener inside every analysis VM (TCP 8000
//! by default) that accepts file uploads and process execution commands.
//! The payloads themselves are external; this client only drives the two
//! endpoints the detonation sequence needs.

use cuckoo_core::{ErrorKind, Fault, Machine};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Per-request timeout against the guest agent.
const AGENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent at {url} not reachable: {message}")]
    Unreachable { url: String, message: String },
    #[error("agent at {url} answered {status}")]
    BadStatus { url: String, status: u16 },
}

impl AgentError {
    pub fn to_fault(&self) -> Fault {
        Fault::new(ErrorKind::AgentUnreachable, self.to_string())
    }
}

/// Thin reqwest wrapper for `/store` and `/execute`.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(AGENT_TIMEOUT)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    fn url(machine: &Machine, endpoint: &str) -> String {
        format!("http://{}:{}/{endpoint}", machine.ip, machine.agent_port)
    }

    /// Upload a file into the guest at the given path.
    pub async fn store(
        &self,
        machine: &Machine,
        filepath: &str,
        bytes: Vec<u8>,
    ) -> Result<(), AgentError> {
        let url = Self::url(machine, "store");
        debug!(machine = %machine.name, filepath, bytes = bytes.len(), "agent store");
        let response = self
            .http
            .post(&url)
            .query(&[("filepath", filepath)])
            .body(bytes)
            .send()
            .await
            .map_err(|e| AgentError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(AgentError::BadStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Execute a command inside the guest.
    pub async fn execute(&self, machine: &Machine, command: &str) -> Result<(), AgentError> {
        let url = Self::url(machine, "execute");
        debug!(machine = %machine.name, command, "agent execute");
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await
            .map_err(|e| AgentError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(AgentError::BadStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Probe the agent without side effects.
    pub async fn ping(&self, machine: &Machine) -> Result<(), AgentError> {
        let url = Self::url(machine, "");
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Unreachable {
                url,
                message: e.to_string(),
            })?;
        Ok(())
    }
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
