//! Cache statistics tracking and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters for one cache generation.
#[derive(Debug)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    memory_evictions: AtomicU64,
    coalesced_loads: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    disk_writes: AtomicU64,
    disk_write_failures: AtomicU64,
    write_backs: AtomicU64,
    computations: AtomicU64,
    computation_failures: AtomicU64,
    created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            memory_hits: AtomicU64::new(0),
            memory_misses: AtomicU64::new(0),
            memory_evictions: AtomicU64::new(0),
            coalesced_loads: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            disk_misses: AtomicU64::new(0),
            disk_writes: AtomicU64::new(0),
            disk_write_failures: AtomicU64::new(0),
            write_backs: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            computation_failures: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.memory_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller joined a load already in flight.
    pub fn record_coalesced(&self) {
        self.coalesced_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write(&self) {
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write_failure(&self) {
        self.disk_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// An evicted, unpersisted tile was written to disk.
    pub fn record_write_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computation_failure(&self) {
        self.computation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.memory_misses.load(Ordering::Relaxed),
            memory_evictions: self.memory_evictions.load(Ordering::Relaxed),
            coalesced_loads: self.coalesced_loads.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            disk_write_failures: self.disk_write_failures.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            computation_failures: self.computation_failures.load(Ordering::Relaxed),
            uptime: self.uptime(),
        }
    }
}

/// Copy of [`CacheStats`] counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_evictions: u64,
    pub coalesced_loads: u64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub disk_writes: u64,
    pub disk_write_failures: u64,
    pub write_backs: u64,
    pub computations: u64,
    pub computation_failures: u64,
    pub uptime: Duration,
}

impl CacheStatsSnapshot {
    /// Memory tier hit rate (0.0 to 1.0).
    pub fn memory_hit_rate(&self) -> f64 {
        ratio(self.memory_hits, self.memory_hits + self.memory_misses)
    }

    /// Disk tier hit rate among memory misses (0.0 to 1.0).
    pub fn disk_hit_rate(&self) -> f64 {
        ratio(self.disk_hits, self.disk_hits + self.disk_misses)
    }

    /// Share of lookups served without running the classifier.
    pub fn overall_hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        ratio(hits, hits + self.disk_misses)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
