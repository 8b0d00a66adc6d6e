// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::api::NodeApi;
use cuckoo_core::test_support;
use cuckoo_machinery::MachinePool;

async fn spawn_api(key: &str) -> (String, tokio::sync::mpsc::Receiver<Event>) {
    let dir = tempfile::tempdir().unwrap();
    let cwd = CuckooCwd::at(dir.path());
    cwd.create_tree().unwrap();
    // Leak the tempdir so the API keeps a valid cwd for the test's life.
    std::mem::forget(dir);

    let pool = MachinePool::new();
    pool.register(vec![test_support::machine("win10-1")]);
    let (tx, rx) = tokio::sync::mpsc::channel(16);

    let api = NodeApi {
        pool,
        state: Arc::new(Mutex::new(MaterializedState::default())),
        cwd,
        event_tx: tx,
        api_key: Arc::new(key.to_string()),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, api.router()).await;
    });
    (format!("http://{addr}"), rx)
}

fn client_for(base: &str, key: &str) -> NodeClient {
    NodeClient::new(NodeRecord {
        name: "node1".to_string(),
        api_url: base.to_string(),
        api_key: key.to_string(),
    })
}

#[tokio::test]
async fn machines_round_trip() {
    let (base, _rx) = spawn_api("secret").await;
    let client = client_for(&base, "secret");

    let machines = client.machines().await.unwrap();
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0].name, "win10-1");
}

#[tokio::test]
async fn wrong_key_is_a_bad_status() {
    let (base, _rx) = spawn_api("secret").await;
    let client = client_for(&base, "not-the-key");

    let err = client.machines().await.unwrap_err();
    assert!(matches!(err, NodeClientError::BadStatus { status: 401, .. }));
    assert_eq!(err.to_fault().kind, cuckoo_core::ErrorKind::NodeUnreachable);
}

#[tokio::test]
async fn unreachable_node_reports_as_such() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(&format!("http://{addr}"), "secret");
    let err = client.machines().await.unwrap_err();
    assert!(matches!(err, NodeClientError::Unreachable { .. }));
}

#[tokio::test]
async fn dispatch_rejection_is_surfaced() {
    let (base, _rx) = spawn_api("secret").await;
    let client = client_for(&base, "secret");

    // File analysis whose payload the node does not have.
    let task = test_support::task("20260801-AAAAAA", 1);
    let analysis = test_support::analysis("20260801-AAAAAA");
    let err = client.submit_task(&task, &analysis).await.unwrap_err();
    assert!(matches!(err, NodeClientError::Rejected { .. }));
}

#[tokio::test]
async fn cancel_reaches_the_node_loop() {
    let (base, mut rx) = spawn_api("secret").await;
    let client = client_for(&base, "secret");

    client
        .cancel(&TaskId::new("20260801-AAAAAA_1"))
        .await
        .unwrap();
    let event = rx.recv().await.unwrap();
    assert!(matches!(event, Event::TaskCancel { .. }));
}
