// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders shared across crates (behind the `test-support` feature).

use crate::analysis::{Analysis, TargetDescriptor};
use crate::id::{AnalysisId, MachineName, TaskId};
use crate::machine::Machine;
use crate::route::Route;
use crate::settings::Settings;
use crate::task::{Task, TaskPlatform};
use std::net::{IpAddr, Ipv4Addr};

/// A windows/10 machine with sensible defaults.
pub fn machine(name: &str) -> Machine {
    Machine {
        name: MachineName::new(name),
        label: None,
        ip: IpAddr::V4(Ipv4Addr::new(192, 168, 30, 101)),
        platform: "windows".to_string(),
        os_version: "10".to_string(),
        architecture: "amd64".to_string(),
        agent_port: 8000,
        tags: Default::default(),
        mac: None,
        interface: None,
        snapshot: Some("clean".to_string()),
        machinery: "fake".to_string(),
        state: crate::machine::MachineState::Poweroff,
        reserved_by: None,
        locked_by: None,
        disabled_reason: None,
        last_used_ms: 0,
    }
}

pub fn machine_with(name: &str, platform: &str, os_version: &str, tags: &[&str]) -> Machine {
    let mut m = machine(name);
    m.platform = platform.to_string();
    m.os_version = os_version.to_string();
    m.tags = tags.iter().map(|t| t.to_string()).collect();
    m
}

/// A pending windows/10 task under the given analysis.
pub fn task(analysis: &str, number: u32) -> Task {
    let analysis_id = AnalysisId::new(analysis);
    Task::new(
        TaskId::for_analysis(&analysis_id, number),
        analysis_id,
        TaskPlatform::new("windows", "10"),
        1,
        120,
        Route::none(),
        1_000,
    )
}

/// A tracked file analysis with default settings.
pub fn analysis(id: &str) -> Analysis {
    Analysis::new(
        AnalysisId::new(id),
        TargetDescriptor::File {
            filename: "sample.exe".to_string(),
            size: 4096,
            sha256: "ab".repeat(32),
            media_type: Some("application/x-dosexec".to_string()),
        },
        Settings::default(),
        1_000,
    )
}
