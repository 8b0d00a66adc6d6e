// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cuckoo_core::{AnalysisId, Event};
use std::io::Write as _;

fn event(n: u32) -> Event {
    Event::TrackNew {
        id: AnalysisId::new(format!("20260801-{n:06}")),
    }
}

#[test]
fn append_flush_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskqueue.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.append(&event(1)).unwrap(), 1);
    assert_eq!(wal.append(&event(2)).unwrap(), 2);
    wal.flush().unwrap();

    let entry = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 1);
    wal.mark_processed(entry.seq);

    let entry = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 2);
    assert!(wal.next_unprocessed().unwrap().is_none());
}

#[test]
fn reopen_resumes_after_processed_seq() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskqueue.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        for n in 1..=3 {
            wal.append(&event(n)).unwrap();
        }
        wal.flush().unwrap();
    }

    // Snapshot said we processed up to seq 2.
    let mut wal = Wal::open(&path, 2).unwrap();
    assert_eq!(wal.write_seq(), 3);
    let entry = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 3);
}

#[test]
fn entries_after_filters_by_seq() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskqueue.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    for n in 1..=5 {
        wal.append(&event(n)).unwrap();
    }
    wal.flush().unwrap();

    let entries = wal.entries_after(3).unwrap();
    let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![4, 5]);
}

#[test]
fn corrupt_tail_is_truncated_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskqueue.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&event(1)).unwrap();
        wal.append(&event(2)).unwrap();
        wal.flush().unwrap();
    }
    // Simulate a torn write.
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{\"seq\":3,\"event\":{\"ty").unwrap();
    }

    let mut wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 2);
    // New appends continue cleanly after the truncated tail.
    assert_eq!(wal.append(&event(3)).unwrap(), 3);
    wal.flush().unwrap();
    assert_eq!(wal.entries_after(0).unwrap().len(), 3);
}

#[test]
fn truncate_before_drops_old_entries_and_keeps_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskqueue.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    for n in 1..=4 {
        wal.append(&event(n)).unwrap();
    }
    wal.flush().unwrap();

    // Process 1-3, checkpoint at 3, truncate.
    for _ in 0..3 {
        let entry = wal.next_unprocessed().unwrap().unwrap();
        wal.mark_processed(entry.seq);
    }
    wal.truncate_before(3).unwrap();

    let remaining = wal.entries_after(0).unwrap();
    let seqs: Vec<u64> = remaining.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![3, 4]);

    // The unprocessed cursor still lands on seq 4.
    let entry = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 4);
}
