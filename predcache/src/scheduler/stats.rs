//! Fetch scheduler statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one scheduler.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    enqueued: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    stale_dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self, count: u64) {
        self.stale_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`SchedulerStats`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStatsSnapshot {
    /// Requests admitted to the queue.
    pub enqueued: u64,
    /// Requests ignored because the tile was already queued or running.
    pub duplicates: u64,
    /// Requests refused (stale, closed or backing off).
    pub rejected: u64,
    /// Queued requests dropped without execution.
    pub stale_dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

impl SchedulerStatsSnapshot {
    /// Fetches that ran to completion, successfully or not.
    pub fn executed(&self) -> u64 {
        self.completed + self.failed
    }
}
