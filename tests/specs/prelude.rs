// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures: a bootable working directory with the fake machinery
//! and a scripted in-test guest agent.

use cuckoo_core::{AnalysisId, CuckooCwd, Settings, SystemClock};
use cuckoo_daemon::{
    startup, submit_file, CuckooConfig, DaemonState, EventReader, StartupOptions, StartupResult,
};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal in-guest agent stand-in: answers 200 to /store and /execute.
pub async fn spawn_fake_agent() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            });
        }
    });
    port
}

/// Materialize a bootable cwd: config, fake machinery, result server on
/// an ephemeral port.
pub fn write_cwd(root: &Path, agent_port: u16, routing: bool) -> CuckooCwd {
    let cwd = CuckooCwd::at(root);
    cwd.create_tree().unwrap();
    std::fs::write(
        cwd.conf_file("cuckoo.toml"),
        format!(
            r#"
machineries = ["fake"]

[submit]
min_file_size = 4

[resultserver]
listen_ip = "127.0.0.1"
listen_port = 0

[network_routing]
enabled = {routing}
"#
        ),
    )
    .unwrap();
    std::fs::write(
        cwd.machinery_conf("fake"),
        format!(
            r#"
kind = "fake"

[[machine]]
name = "win10-1"
ip = "127.0.0.1"
platform = "windows"
os_version = "10"
agent_port = {agent_port}
machinery = "fake"
snapshot = "clean"
"#
        ),
    )
    .unwrap();
    cwd
}

pub async fn boot(cwd: CuckooCwd) -> StartupResult {
    startup(StartupOptions {
        cwd,
        local_machinery: true,
        cancel_abandoned_override: None,
        node_dispatcher: None,
    })
    .await
    .unwrap()
}

/// Submit a PE-looking sample of `size` bytes.
pub fn submit_sample(cwd: &CuckooCwd, dir: &Path, size: usize, settings: Settings) -> AnalysisId {
    let mut bytes = b"MZ\x90\x00".to_vec();
    bytes.resize(size, 0x41);
    let source = dir.join("sample.exe");
    std::fs::write(&source, &bytes).unwrap();
    let config = CuckooConfig::load(&cwd.conf_file("cuckoo.toml")).unwrap();
    submit_file(cwd, &config, &SystemClock, &source, settings).unwrap()
}

/// Pump the controller loop by hand until the WAL drains.
pub async fn drain(daemon: &DaemonState, reader: &mut EventReader) {
    loop {
        daemon.event_bus.flush().unwrap();
        let entry = {
            let wal_handle = reader.wal();
            let mut wal = wal_handle.lock();
            wal.next_unprocessed().unwrap()
        };
        let Some(entry) = entry else { break };
        daemon.state.lock().apply_event(&entry.event);
        let _ = daemon.process_event(entry.event);
        reader.mark_processed(entry.seq);
    }
}

/// Drain repeatedly, sleeping between rounds so spawned workers and
/// runners can report back, until `done` says the world settled (or the
/// budget runs out).
pub async fn drain_until(
    daemon: &DaemonState,
    reader: &mut EventReader,
    mut done: impl FnMut(&DaemonState) -> bool,
) {
    for _ in 0..100 {
        drain(daemon, reader).await;
        if done(daemon) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("world did not settle");
}

