// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL write-ahead log for controller events, with group commit.
//!
//! Every event is appended as one line `{"seq":N,"event":{...}}` before the
//! controller acts on it. Appends are buffered and flushed with a single
//! fsync (~10ms batches); recovery replays entries after the snapshot's
//! sequence number. A corrupt tail (torn write on crash) is truncated to
//! the last parseable entry.

use cuckoo_core::Event;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit.
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum buffered entries before a flush is forced.
const FLUSH_THRESHOLD: usize = 100;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct RecordRef<'a> {
    seq: u64,
    event: &'a Event,
}

#[derive(Deserialize)]
struct Record {
    seq: u64,
    event: Event,
}

/// One durable log entry.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// Append-only event log.
///
/// Tracks two cursors: `write_seq` (highest assigned sequence) and
/// `processed_seq` (highest sequence the controller has handled; persisted
/// via snapshots, not by the WAL itself).
pub struct Wal {
    file: File,
    path: PathBuf,
    write_seq: u64,
    processed_seq: u64,
    /// JSON lines awaiting the next fsync.
    pending: Vec<Vec<u8>>,
    last_flush: Instant,
    /// Byte offset of the first unprocessed entry.
    read_offset: u64,
}

impl Wal {
    /// Open or create the log. `processed_seq` comes from the snapshot
    /// (0 without one). A corrupt tail is truncated with a warning.
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let scan = scan(&file, processed_seq)?;
        if scan.valid_len < scan.total_len {
            warn!(
                path = %path.display(),
                dropped_bytes = scan.total_len - scan.valid_len,
                "truncating corrupt tail of write-ahead log"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq: scan.max_seq,
            processed_seq,
            pending: Vec::new(),
            last_flush: Instant::now(),
            read_offset: scan.read_offset,
        })
    }

    /// Buffer an event and assign its sequence number. Not durable until
    /// `flush()`.
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        self.write_seq += 1;
        let record = RecordRef {
            seq: self.write_seq,
            event,
        };
        self.pending.push(serde_json::to_vec(&record)?);
        Ok(self.write_seq)
    }

    /// Whether the group-commit window has elapsed or the buffer is full.
    pub fn needs_flush(&self) -> bool {
        !self.pending.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.pending.len() >= FLUSH_THRESHOLD)
    }

    /// Write all buffered entries with a single fsync. The durability point.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        for mut line in self.pending.drain(..) {
            line.push(b'\n');
            self.file.write_all(&line)?;
        }
        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Next entry the controller has not yet processed, if any.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        // Buffered entries must be readable.
        self.flush()?;

        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(self.read_offset))?;

        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.read_offset += bytes_read as u64;
            return Ok(None);
        }

        match serde_json::from_str::<Record>(trimmed) {
            Ok(record) => {
                self.read_offset += bytes_read as u64;
                Ok(Some(WalEntry {
                    seq: record.seq,
                    event: record.event,
                }))
            }
            Err(e) => {
                warn!(offset = self.read_offset, error = %e, "skipping corrupt log entry");
                self.read_offset += bytes_read as u64;
                Ok(None)
            }
        }
    }

    /// Record that the controller handled this sequence. Persisted via the
    /// next snapshot.
    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = seq;
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// All entries with sequence greater than `seq`, for recovery replay.
    pub fn entries_after(&self, seq: u64) -> Result<Vec<WalEntry>, WalError> {
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<Record>(trimmed) else {
                // scan() already truncated corruption at open; a parse
                // failure here means a torn concurrent write; stop.
                break;
            };
            if record.seq > seq {
                entries.push(WalEntry {
                    seq: record.seq,
                    event: record.event,
                });
            }
        }
        Ok(entries)
    }

    /// Drop entries with sequence below `seq` by rewriting the file.
    /// Called after a durable checkpoint to reclaim space.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), WalError> {
        self.flush()?;

        let kept = self.entries_after(seq.saturating_sub(1))?;

        let tmp_path = self.path.with_extension("wal.tmp");
        let mut read_offset = 0u64;
        {
            let mut tmp = File::create(&tmp_path)?;
            let mut offset = 0u64;
            let mut found_unprocessed = false;
            for entry in &kept {
                let record = RecordRef {
                    seq: entry.seq,
                    event: &entry.event,
                };
                let mut line = serde_json::to_vec(&record)?;
                line.push(b'\n');
                if entry.seq > self.processed_seq && !found_unprocessed {
                    read_offset = offset;
                    found_unprocessed = true;
                }
                tmp.write_all(&line)?;
                offset += line.len() as u64;
            }
            if !found_unprocessed {
                read_offset = offset;
            }
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.read_offset = read_offset;
        Ok(())
    }
}

struct ScanOutcome {
    max_seq: u64,
    /// Offset of the first entry after `processed_seq`.
    read_offset: u64,
    /// Length of the parseable prefix.
    valid_len: u64,
    total_len: u64,
}

fn scan(file: &File, processed_seq: u64) -> Result<ScanOutcome, WalError> {
    let total_len = file.metadata()?.len();
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;

    let mut outcome = ScanOutcome {
        max_seq: 0,
        read_offset: 0,
        valid_len: 0,
        total_len,
    };
    let mut offset = 0u64;
    let mut found_unprocessed = false;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
            Err(e) => return Err(e.into()),
        };
        // A line without a trailing newline is a torn write; leave it out
        // of the valid prefix so it gets truncated.
        if !line.ends_with('\n') {
            break;
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            let Ok(record) = serde_json::from_str::<Record>(trimmed) else {
                break;
            };
            outcome.max_seq = outcome.max_seq.max(record.seq);
            if record.seq > processed_seq && !found_unprocessed {
                outcome.read_offset = offset;
                found_unprocessed = true;
            }
        }
        offset += bytes_read as u64;
        outcome.valid_len = offset;
    }

    if !found_unprocessed {
        outcome.read_offset = outcome.valid_len;
    }
    Ok(outcome)
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
