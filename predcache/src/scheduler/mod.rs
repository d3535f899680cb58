//! Background fetch scheduling.
//!
//! Decouples fetch requests from their execution so the render thread never
//! blocks. Requests wait in a priority queue and a fixed pool of worker
//! threads drains it, calling [`MemoryTileCache::get_or_load`] for each.
//!
//! ```text
//! VolatileTileView::sample ──enqueue──► BinaryHeap<QueuedFetch>
//!                                              │ (priority, FIFO)
//!                                              ▼
//!                               fetch-worker-N threads
//!                                              │
//!                          MemoryTileCache::get_or_load
//!                                              │
//!                                              ▼
//!                             broadcast TileReady { generation, index }
//! ```
//!
//! At most one request per tile is queued or running at a time. Requests
//! whose generation is no longer current are dropped when dequeued; a fetch
//! that is already running always completes.

mod request;
mod retry;
mod stats;

pub use request::{Admission, FetchRequest, Priority};
pub use retry::{RetryPolicy, DEFAULT_RETRY_BASE, DEFAULT_RETRY_MAX};
pub use stats::{SchedulerStats, SchedulerStatsSnapshot};

use std::any::Any;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::cache::MemoryTileCache;
use crate::generation::{CurrentGeneration, GenerationId};
use crate::grid::TileIndex;
use request::QueuedFetch;
use retry::Backoff;

/// Capacity of the tile-ready broadcast channel.
pub const READY_CHANNEL_CAPACITY: usize = 1024;

/// Notification that a tile became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileReady {
    pub generation: GenerationId,
    pub index: TileIndex,
}

/// Configuration for the fetch worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads (default: number of CPU cores)
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedFetch>,
    /// Tiles queued or running.
    outstanding: HashSet<TileIndex>,
    running: usize,
    sequence: u64,
    closed: bool,
    failures: HashMap<TileIndex, Backoff>,
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.heap.is_empty() && self.running == 0
    }
}

struct Shared {
    generation: GenerationId,
    current: CurrentGeneration,
    cache: Arc<MemoryTileCache>,
    retry: RetryPolicy,
    queue: Mutex<QueueState>,
    work_available: Condvar,
    drained: Condvar,
    ready: broadcast::Sender<TileReady>,
    stats: SchedulerStats,
}

/// Priority-ordered fetch queue with a worker pool, bound to one generation.
pub struct FetchScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl FetchScheduler {
    /// Create a scheduler. Workers are not running until [`start`](Self::start).
    pub fn new(
        generation: GenerationId,
        current: CurrentGeneration,
        cache: Arc<MemoryTileCache>,
        config: &SchedulerConfig,
        ready: broadcast::Sender<TileReady>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                generation,
                current,
                cache,
                retry: config.retry,
                queue: Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    outstanding: HashSet::new(),
                    running: 0,
                    sequence: 0,
                    closed: false,
                    failures: HashMap::new(),
                }),
                work_available: Condvar::new(),
                drained: Condvar::new(),
                ready,
                stats: SchedulerStats::new(),
            }),
            workers: Mutex::new(Vec::new()),
            worker_count: config.workers.max(1),
        }
    }

    /// Spawn the worker threads. Calling it again has no effect.
    pub fn start(&self) -> io::Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }

        for i in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("fetch-{}-{}", self.shared.generation, i))
                .spawn(move || worker_loop(shared))?;
            workers.push(handle);
        }
        debug!(
            generation = %self.shared.generation,
            workers = self.worker_count,
            "Started fetch workers"
        );
        Ok(())
    }

    pub fn generation(&self) -> GenerationId {
        self.shared.generation
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Ask for a tile to be fetched in the background. Never blocks on
    /// fetch work.
    pub fn enqueue(&self, request: FetchRequest) -> Admission {
        let shared = &self.shared;
        if request.generation != shared.generation
            || shared.current.get() != Some(shared.generation)
        {
            shared.stats.record_rejected();
            return Admission::Stale;
        }

        let mut queue = shared.queue.lock();
        if queue.closed {
            shared.stats.record_rejected();
            return Admission::Closed;
        }
        if queue.outstanding.contains(&request.index) {
            shared.stats.record_duplicate();
            return Admission::Duplicate;
        }
        if let Some(retry_in) = queue
            .failures
            .get(&request.index)
            .and_then(|backoff| backoff.remaining(Instant::now()))
        {
            shared.stats.record_rejected();
            return Admission::BackingOff { retry_in };
        }

        let sequence = queue.sequence;
        queue.sequence += 1;
        queue.outstanding.insert(request.index);
        queue.heap.push(QueuedFetch { request, sequence });
        shared.stats.record_enqueued();
        trace!(
            generation = %shared.generation,
            tile = %request.index,
            priority = %request.priority,
            "Queued fetch"
        );
        drop(queue);

        shared.work_available.notify_one();
        Admission::Queued
    }

    /// Whether a fetch for the tile is queued or running.
    pub fn is_outstanding(&self, index: TileIndex) -> bool {
        self.shared.queue.lock().outstanding.contains(&index)
    }

    /// Number of queued (not yet running) requests.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    /// Number of fetches currently executing.
    pub fn running(&self) -> usize {
        self.shared.queue.lock().running
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }

    /// Stop accepting work and drop everything still queued. Fetches already
    /// running are left to finish.
    pub fn close(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return;
        }
        queue.closed = true;
        let dropped = queue.heap.len() as u64;
        for queued in std::mem::take(&mut queue.heap) {
            queue.outstanding.remove(&queued.request.index);
        }
        self.shared.stats.record_stale(dropped);
        let drained = queue.is_drained();
        drop(queue);

        debug!(generation = %self.shared.generation, dropped, "Closed fetch scheduler");
        self.shared.work_available.notify_all();
        if drained {
            self.shared.drained.notify_all();
        }
    }

    /// Block until the queue is empty and no fetch is running.
    ///
    /// Returns immediately when there is nothing to wait for. Queued work on
    /// a scheduler that was never started is only released by [`close`](Self::close).
    pub fn wait_drained(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.is_drained() {
            self.shared.drained.wait(&mut queue);
        }
    }

    /// Like [`wait_drained`](Self::wait_drained) with a deadline. Returns
    /// whether the scheduler drained in time.
    pub fn wait_drained_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !queue.is_drained() {
            if self
                .shared
                .drained
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                return queue.is_drained();
            }
        }
        true
    }

    /// Close the scheduler and join its workers.
    pub fn shutdown(&self) {
        self.close();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!(generation = %self.shared.generation, "Fetch worker panicked");
            }
        }
    }
}

impl Drop for FetchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("generation", &self.shared.generation)
            .field("workers", &self.worker_count)
            .field("queued", &self.queued())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let request = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(queued) = queue.heap.pop() {
                    queue.running += 1;
                    break queued.request;
                }
                if queue.closed {
                    return;
                }
                shared.work_available.wait(&mut queue);
            }
        };

        if shared.current.get() != Some(request.generation) {
            trace!(generation = %request.generation, tile = %request.index, "Dropped stale fetch");
            shared.stats.record_stale(1);
            finish(&shared, request.index, None);
            continue;
        }

        // A panicking classifier or data source counts as a failed fetch, so
        // the tile leaves `outstanding` and can be retried after backoff.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            shared.cache.get_or_load(request.index)
        }));
        let succeeded = match outcome {
            Ok(Ok(_)) => {
                shared.stats.record_completed();
                true
            }
            Ok(Err(e)) => {
                shared.stats.record_failed();
                warn!(
                    generation = %request.generation,
                    tile = %request.index,
                    error = %e,
                    "Fetch failed"
                );
                false
            }
            Err(payload) => {
                shared.stats.record_failed();
                warn!(
                    generation = %request.generation,
                    tile = %request.index,
                    panic = %panic_message(&*payload),
                    "Fetch panicked"
                );
                false
            }
        };
        finish(&shared, request.index, Some(succeeded));

        if succeeded {
            // No receivers is fine; polling `sample` is enough on its own.
            let _ = shared.ready.send(TileReady {
                generation: request.generation,
                index: request.index,
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn finish(shared: &Shared, index: TileIndex, succeeded: Option<bool>) {
    let mut queue = shared.queue.lock();
    queue.running -= 1;
    queue.outstanding.remove(&index);
    match succeeded {
        Some(true) => {
            queue.failures.remove(&index);
        }
        Some(false) => {
            let previous = queue.failures.get(&index).copied();
            let backoff = Backoff::after_failure(previous, &shared.retry, Instant::now());
            queue.failures.insert(index, backoff);
        }
        None => {}
    }
    if queue.is_drained() {
        shared.drained.notify_all();
    }
}
