// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::frame::{encode_frame, encode_header, MAX_FRAME_LEN};
use crate::registry::TaskRegistration;
use cuckoo_core::TaskId;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

async fn spawn_server(registry: RunningTasks) -> SocketAddr {
    let server = ResultServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        registry,
        MAX_FRAME_LEN,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

fn register(registry: &RunningTasks, dir: &Path, task: &str) -> std::sync::Arc<tokio::sync::Notify> {
    registry.register(TaskRegistration {
        task_id: TaskId::new(task),
        machine_ip: "127.0.0.1".parse().unwrap(),
        task_dir: dir.to_path_buf(),
    })
}

async fn wait_for_done(registry: &RunningTasks, task: &str) {
    let id = TaskId::new(task);
    for _ in 0..100 {
        if registry.is_done(&id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("done was never signalled for {task}");
}

#[tokio::test]
async fn upload_demuxes_into_task_directory() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RunningTasks::new();
    register(&registry, dir.path(), "20260801-AAAAAA_1");
    let addr = spawn_server(registry.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&encode_header(&TaskId::new("20260801-AAAAAA_1")))
        .await
        .unwrap();
    stream
        .write_all(&encode_frame(StreamKind::Log, b"first line\n"))
        .await
        .unwrap();
    stream
        .write_all(&encode_frame(StreamKind::Log, b"second line\n"))
        .await
        .unwrap();
    stream
        .write_all(&encode_frame(StreamKind::Screenshot, b"\xFF\xD8jpegbytes"))
        .await
        .unwrap();
    stream
        .write_all(&encode_frame(StreamKind::Netdump, b"\xD4\xC3\xB2\xA1pcap"))
        .await
        .unwrap();
    stream
        .write_all(&encode_frame(StreamKind::Done, b""))
        .await
        .unwrap();

    wait_for_done(&registry, "20260801-AAAAAA_1").await;

    assert_eq!(
        std::fs::read_to_string(dir.path().join("log.txt")).unwrap(),
        "first line\nsecond line\n"
    );
    assert_eq!(
        std::fs::read(dir.path().join("screenshots/0001.jpg")).unwrap(),
        b"\xFF\xD8jpegbytes"
    );
    assert_eq!(
        std::fs::read(dir.path().join("network.pcap")).unwrap(),
        b"\xD4\xC3\xB2\xA1pcap"
    );
}

#[tokio::test]
async fn unknown_task_connection_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RunningTasks::new();
    register(&registry, dir.path(), "20260801-AAAAAA_1");
    let addr = spawn_server(registry.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&encode_header(&TaskId::new("20260801-ZZZZZZ_1")))
        .await
        .unwrap();
    stream
        .write_all(&encode_frame(StreamKind::Log, b"should not land\n"))
        .await
        .unwrap();
    drop(stream);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!dir.path().join("log.txt").exists());
    assert!(!registry.is_done(&TaskId::new("20260801-AAAAAA_1")));
}

#[tokio::test]
async fn oversized_frame_closes_without_write() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RunningTasks::new();
    register(&registry, dir.path(), "20260801-AAAAAA_1");

    let server = ResultServer::bind("127.0.0.1:0".parse().unwrap(), registry.clone(), 1024)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&encode_header(&TaskId::new("20260801-AAAAAA_1")))
        .await
        .unwrap();
    // Header claims 2048 bytes against a 1024 cap.
    let mut oversized = Vec::new();
    oversized.push(0x01);
    oversized.extend_from_slice(&2048u32.to_be_bytes());
    oversized.extend_from_slice(&vec![0u8; 2048]);
    stream.write_all(&oversized).await.unwrap();

    // Server closes; our next read sees EOF.
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), async {
        use tokio::io::AsyncReadExt;
        stream.read(&mut buf).await
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(n, 0);
    assert!(!dir.path().join("log.txt").exists());
}

#[tokio::test]
async fn clean_close_without_done_still_signals() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RunningTasks::new();
    register(&registry, dir.path(), "20260801-AAAAAA_1");
    let addr = spawn_server(registry.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&encode_header(&TaskId::new("20260801-AAAAAA_1")))
        .await
        .unwrap();
    stream
        .write_all(&encode_frame(StreamKind::Tty, b"shell output"))
        .await
        .unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    wait_for_done(&registry, "20260801-AAAAAA_1").await;
    assert_eq!(
        std::fs::read(dir.path().join("tty.txt")).unwrap(),
        b"shell output"
    );
}

#[tokio::test]
async fn same_frames_twice_produce_identical_append_file() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let registry = RunningTasks::new();
    register(&registry, dir_a.path(), "20260801-AAAAAA_1");
    register(&registry, dir_b.path(), "20260801-BBBBBB_1");
    let addr = spawn_server(registry.clone()).await;

    for task in ["20260801-AAAAAA_1", "20260801-BBBBBB_1"] {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&encode_header(&TaskId::new(task))).await.unwrap();
        for chunk in [&b"alpha\n"[..], &b"beta\n"[..]] {
            stream
                .write_all(&encode_frame(StreamKind::Log, chunk))
                .await
                .unwrap();
        }
        stream
            .write_all(&encode_frame(StreamKind::Done, b""))
            .await
            .unwrap();
        wait_for_done(&registry, task).await;
    }

    let hash = |p: &Path| {
        let bytes = std::fs::read(p).unwrap();
        format!("{:x}", Sha256::digest(&bytes))
    };
    assert_eq!(
        hash(&dir_a.path().join("log.txt")),
        hash(&dir_b.path().join("log.txt"))
    );
}
