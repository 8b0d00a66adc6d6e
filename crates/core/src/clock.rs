// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction so schedulers and state machines are testable.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of time for the orchestrator.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Monotonic instant for deadlines and elapsed measurements.
    fn now(&self) -> Instant;

    /// Wall-clock epoch milliseconds for persisted timestamps.
    fn epoch_ms(&self) -> u64;

    /// Today's date as `YYYYMMDD`, used in analysis ids and directory layout.
    fn today_compact(&self) -> String;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn today_compact(&self) -> String {
        Utc::now().format("%Y%m%d").to_string()
    }
}

/// Controllable clock for tests.
#[derive(Debug, Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockInner>>,
}

#[derive(Debug)]
struct FakeClockInner {
    base: Instant,
    offset: Duration,
    epoch_ms: u64,
    date: String,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClockInner {
                base: Instant::now(),
                offset: Duration::ZERO,
                epoch_ms: 1_700_000_000_000,
                date: "20260801".to_string(),
            })),
        }
    }

    /// Advance both the monotonic and wall clocks.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock();
        inner.offset += by;
        inner.epoch_ms += by.as_millis() as u64;
    }

    pub fn set_date(&self, date: impl Into<String>) {
        self.inner.lock().date = date.into();
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let inner = self.inner.lock();
        inner.base + inner.offset
    }

    fn epoch_ms(&self) -> u64 {
        self.inner.lock().epoch_ms
    }

    fn today_compact(&self) -> String {
        self.inner.lock().date.clone()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
