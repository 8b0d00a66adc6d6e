// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error classification shared across component boundaries.
//!
//! Runners and workers translate low-level failures into these kinds and
//! surface them to the controller; the controller records them on the
//! analysis or task and never propagates further.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recoverable-vs-fatal classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad configuration; fatal at startup, refuse to boot.
    ConfigInvalid,
    /// Machinery operation failed but the machine is usable; retry up to 2x.
    MachineryTransient,
    /// Machinery left the VM inconsistent; disable machine, requeue or fail task.
    MachineryFatal,
    /// Guest agent did not answer; retry restore once, then fail the task.
    AgentUnreachable,
    /// Route apply failed; fail the task before restore.
    RouteError,
    /// Result-server peer misbehaved; drop the connection, task proceeds.
    ResultServerPeerError,
    /// Stage worker exceeded its wall timeout.
    StageTimeout,
    /// No registered machine can ever satisfy the task requirements.
    NoMatchingMachine,
    /// Remote node unreachable after retries.
    NodeUnreachable,
    /// A state invariant was violated; log and crash, recover on restart.
    StateInvariantViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigInvalid => "config_invalid",
            ErrorKind::MachineryTransient => "machinery_transient",
            ErrorKind::MachineryFatal => "machinery_fatal",
            ErrorKind::AgentUnreachable => "agent_unreachable",
            ErrorKind::RouteError => "route_error",
            ErrorKind::ResultServerPeerError => "resultserver_peer_error",
            ErrorKind::StageTimeout => "stage_timeout",
            ErrorKind::NoMatchingMachine => "no_matching_machine",
            ErrorKind::NodeUnreachable => "node_unreachable",
            ErrorKind::StateInvariantViolation => "state_invariant_violation",
        };
        write!(f, "{s}")
    }
}

/// A classified failure with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// True when retrying the same step may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::MachineryTransient | ErrorKind::NodeUnreachable
        )
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
#[path = "fault_tests.rs"]
mod tests;
