// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cuckoo_core::test_support;
use tokio::sync::mpsc::Receiver;

struct TestNode {
    base: String,
    rx: Receiver<Event>,
    state: Arc<Mutex<MaterializedState>>,
    cwd: CuckooCwd,
    _dir: tempfile::TempDir,
}

async fn spawn_api() -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let cwd = CuckooCwd::at(dir.path());
    cwd.create_tree().unwrap();

    let pool = MachinePool::new();
    pool.register(vec![test_support::machine("win10-1")]);
    let state = Arc::new(Mutex::new(MaterializedState::default()));
    let (tx, rx) = tokio::sync::mpsc::channel(16);

    let api = NodeApi {
        pool,
        state: Arc::clone(&state),
        cwd: cwd.clone(),
        event_tx: tx,
        api_key: Arc::new("secret".to_string()),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, api.router()).await;
    });

    TestNode {
        base: format!("http://{addr}"),
        rx,
        state,
        cwd,
        _dir: dir,
    }
}

fn http() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let node = spawn_api().await;
    let response = http()
        .get(format!("{}/machines", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = http()
        .get(format!("{}/machines", node.base))
        .header("authorization", "token wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn machines_lists_the_pool() {
    let node = spawn_api().await;
    let machines: Vec<Machine> = http()
        .get(format!("{}/machines", node.base))
        .header("authorization", "token secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0].name, "win10-1");
}

#[tokio::test]
async fn dispatch_without_payload_conflicts_then_accepts() {
    let mut node = spawn_api().await;
    let analysis = test_support::analysis("20260801-AAAAAA");
    let task = test_support::task("20260801-AAAAAA", 1);
    let request = crate::api::DispatchRequest {
        task,
        analysis: analysis.clone(),
    };

    // The binary is not on the node yet.
    let response = http()
        .post(format!("{}/tasks", node.base))
        .header("authorization", "token secret")
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Upload real bytes, then dispatch an analysis addressing them.
    let bytes = b"MZ test payload bytes large enough".to_vec();
    let digest = {
        use sha2::Digest as _;
        format!("{:x}", sha2::Sha256::digest(&bytes))
    };
    let upload = http()
        .post(format!("{}/binaries/{digest}", node.base))
        .header("authorization", "token secret")
        .body(bytes)
        .send()
        .await
        .unwrap();
    assert_eq!(upload.status(), 201);

    let mut analysis = analysis;
    analysis.target = cuckoo_core::TargetDescriptor::File {
        filename: "sample.exe".to_string(),
        size: 34,
        sha256: digest,
        media_type: None,
    };
    let request = crate::api::DispatchRequest {
        task: test_support::task("20260801-AAAAAA", 1),
        analysis,
    };
    let response = http()
        .post(format!("{}/tasks", node.base))
        .header("authorization", "token secret")
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    // The node's controller loop receives the seeded rows.
    let first = node.rx.recv().await.unwrap();
    assert!(matches!(first, Event::AnalysisTracked { .. }));
    let second = node.rx.recv().await.unwrap();
    let Event::TaskCreated { task } = second else {
        panic!("expected task:created");
    };
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.machine, None);
}

#[tokio::test]
async fn mismatched_upload_digest_is_rejected() {
    let node = spawn_api().await;
    let claimed = "0".repeat(64);
    let response = http()
        .post(format!("{}/binaries/{claimed}", node.base))
        .header("authorization", "token secret")
        .body(vec![b'x'; 200])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn task_snapshot_and_cancel() {
    let mut node = spawn_api().await;

    // Unknown task: 404.
    let response = http()
        .get(format!("{}/tasks/20260801-AAAAAA_1", node.base))
        .header("authorization", "token secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Seed a row, then snapshot it.
    {
        let mut state = node.state.lock();
        let mut analysis = test_support::analysis("20260801-AAAAAA");
        analysis.state = cuckoo_core::AnalysisState::TasksPending;
        state.apply_event(&Event::AnalysisTracked {
            analysis: Box::new(analysis),
        });
        state.apply_event(&Event::TaskCreated {
            task: Box::new(test_support::task("20260801-AAAAAA", 1)),
        });
    }
    let snapshot: crate::api::TaskSnapshot = http()
        .get(format!("{}/tasks/20260801-AAAAAA_1", node.base))
        .header("authorization", "token secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot.state, TaskState::Pending);

    // Cancel goes to the controller loop.
    let response = http()
        .delete(format!("{}/tasks/20260801-AAAAAA_1", node.base))
        .header("authorization", "token secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let event = node.rx.recv().await.unwrap();
    assert!(matches!(event, Event::TaskCancel { .. }));
}

#[tokio::test]
async fn result_tarball_round_trips() {
    let node = spawn_api().await;
    let task_id = TaskId::new("20260801-AAAAAA_1");
    let task_dir = node.cwd.task_dir(&task_id);
    std::fs::create_dir_all(&task_dir).unwrap();
    std::fs::write(task_dir.join("log.txt"), b"evidence\n").unwrap();

    let bytes = http()
        .get(format!("{}/tasks/{task_id}/result", node.base))
        .header("authorization", "token secret")
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let dest = tempfile::tempdir().unwrap();
    crate::transfer::unpack_task_dir(&bytes, dest.path()).unwrap();
    assert_eq!(
        std::fs::read(dest.path().join("log.txt")).unwrap(),
        b"evidence\n"
    );
}
