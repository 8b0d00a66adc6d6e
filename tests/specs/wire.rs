// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level paths: guest uploads over real TCP into a running daemon.

use crate::prelude::*;
use cuckoo_core::{AnalysisState, Settings, TaskId, TaskState};
use cuckoo_resultserver::frame::{encode_frame, encode_header};
use cuckoo_resultserver::StreamKind;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[tokio::test(flavor = "multi_thread")]
async fn guest_upload_over_tcp_reaches_the_task_directory() {
    let dir = tempfile::tempdir().unwrap();
    let agent_port = spawn_fake_agent().await;
    let cwd = write_cwd(dir.path(), agent_port, false);
    let id = submit_sample(&cwd, dir.path(), 4096, Settings::default());

    let result = boot(cwd.clone()).await;
    let daemon = result.daemon;
    let mut reader = result.event_reader;
    let resultserver = daemon.resultserver_addr.expect("result server bound");

    // Play the guest: once the task is registered as running, upload a
    // log and a screenshot, then send done.
    let task_id = TaskId::for_analysis(&id, 1);
    {
        let results = daemon.results.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                if results
                    .validate(&task_id, "127.0.0.1".parse().unwrap())
                    .is_none()
                {
                    continue;
                }
                let Ok(mut stream) = TcpStream::connect(resultserver).await else {
                    continue;
                };
                stream.write_all(&encode_header(&task_id)).await.unwrap();
                stream
                    .write_all(&encode_frame(StreamKind::Log, b"behavior line\n"))
                    .await
                    .unwrap();
                stream
                    .write_all(&encode_frame(StreamKind::Screenshot, b"\xFF\xD8fake"))
                    .await
                    .unwrap();
                stream
                    .write_all(&encode_frame(StreamKind::Done, b""))
                    .await
                    .unwrap();
                return;
            }
        });
    }

    drain_until(&daemon, &mut reader, |daemon| {
        daemon.state.lock().analysis_state(&id) == Some(AnalysisState::Finished)
    })
    .await;

    let state = daemon.state.lock();
    let task = state.task(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Reported);
    // The evidence-presence scorer saw the log.
    assert_eq!(task.score, 1);
    assert_eq!(state.analysis(&id).unwrap().score, 1);
    drop(state);

    let task_dir = cwd.task_dir(&task_id);
    assert_eq!(
        std::fs::read(task_dir.join("log.txt")).unwrap(),
        b"behavior line\n"
    );
    assert!(task_dir.join("screenshots/0001.jpg").exists());
    assert!(task_dir.join("post.json").exists());
}
