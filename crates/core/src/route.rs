// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task network route descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Labeled network policy applied for the duration of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// No routing changes; traffic stays on the analysis network.
    None,
    /// All guest traffic is dropped.
    Drop,
    /// Guest traffic is NATed to the internet via the dirty line.
    Internet,
    /// Guest traffic is tunneled through a VPN endpoint.
    Vpn,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKind::None => write!(f, "none"),
            RouteKind::Drop => write!(f, "drop"),
            RouteKind::Internet => write!(f, "internet"),
            RouteKind::Vpn => write!(f, "vpn"),
        }
    }
}

impl RouteKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(RouteKind::None),
            "drop" => Some(RouteKind::Drop),
            "internet" => Some(RouteKind::Internet),
            "vpn" => Some(RouteKind::Vpn),
            _ => None,
        }
    }
}

/// A route request: kind plus optional options such as a VPN exit country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "type")]
    pub kind: RouteKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Route {
    pub fn none() -> Self {
        Self {
            kind: RouteKind::None,
            country: None,
        }
    }

    pub fn new(kind: RouteKind) -> Self {
        Self {
            kind,
            country: None,
        }
    }

    /// Check this route against the set the rooter advertised at runtime.
    pub fn is_available(&self, available: &BTreeSet<RouteKind>) -> bool {
        self.kind == RouteKind::None || available.contains(&self.kind)
    }

    /// A route of kind `none` needs no rooter interaction at all.
    pub fn needs_rooter(&self) -> bool {
        self.kind != RouteKind::None
    }
}

impl Default for Route {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => write!(f, "{} ({country})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
#[path = "route_tests.rs"]
mod tests;
