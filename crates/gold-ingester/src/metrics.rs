// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-local counters and liveness stamps.
//!
//! Counters are cheap atomics shared between the ingester and whoever
//! exports them; there is no metrics backend in this crate.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Shared counters for one ingester.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    files_processed: AtomicU64,
    files_success: AtomicU64,
    results_ingested: AtomicU64,
    // Unix millis; zero means "never".
    last_successful_poll_ms: AtomicI64,
    last_successful_process_ms: AtomicI64,
}

impl IngestionMetrics {
    /// Fresh, zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one attempted file.
    pub fn file_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one successful file with its result count, and stamp liveness.
    pub fn file_succeeded(&self, results: usize, now: DateTime<Utc>) {
        self.files_success.fetch_add(1, Ordering::Relaxed);
        self.results_ingested
            .fetch_add(results as u64, Ordering::Relaxed);
        self.last_successful_process_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    /// Stamp a completed poll pass.
    pub fn poll_succeeded(&self, now: DateTime<Utc>) {
        self.last_successful_poll_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_success: self.files_success.load(Ordering::Relaxed),
            results_ingested: self.results_ingested.load(Ordering::Relaxed),
            last_successful_poll_ms: self.last_successful_poll_ms.load(Ordering::Relaxed),
            last_successful_process_ms: self.last_successful_process_ms.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`IngestionMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Files handed to a processor.
    pub files_processed: u64,
    /// Files that processed successfully.
    pub files_success: u64,
    /// Results written across all successful files.
    pub results_ingested: u64,
    /// Unix millis of the last completed poll; zero means never.
    pub last_successful_poll_ms: i64,
    /// Unix millis of the last successful process; zero means never.
    pub last_successful_process_ms: i64,
}

impl MetricsSnapshot {
    /// Time since the last completed poll, if one ever completed.
    #[must_use]
    pub fn time_since_last_poll(&self, now: DateTime<Utc>) -> Option<Duration> {
        stamp_age(self.last_successful_poll_ms, now)
    }

    /// Time since the last successful process, if one ever happened.
    #[must_use]
    pub fn time_since_last_process(&self, now: DateTime<Utc>) -> Option<Duration> {
        stamp_age(self.last_successful_process_ms, now)
    }
}

fn stamp_age(stamp_ms: i64, now: DateTime<Utc>) -> Option<Duration> {
    if stamp_ms == 0 {
        return None;
    }
    Some(Duration::milliseconds(now.timestamp_millis() - stamp_ms))
}
