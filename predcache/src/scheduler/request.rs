//! Fetch requests and queue ordering.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use crate::generation::GenerationId;
use crate::grid::TileIndex;

/// Scheduling priority of a fetch. Higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    /// Background work with no viewer waiting on it.
    pub const PREFETCH: Priority = Priority(0);
    /// Tiles currently on screen.
    pub const VISIBLE: Priority = Priority(1000);

    /// Lower this priority by `steps`, saturating.
    pub fn lowered_by(self, steps: i32) -> Priority {
        Priority(self.0.saturating_sub(steps))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to bring one tile of one generation into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub index: TileIndex,
    pub generation: GenerationId,
    pub priority: Priority,
}

impl FetchRequest {
    pub fn new(index: TileIndex, generation: GenerationId, priority: Priority) -> Self {
        Self {
            index,
            generation,
            priority,
        }
    }
}

/// Outcome of [`FetchScheduler::enqueue`](super::FetchScheduler::enqueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Added to the queue.
    Queued,
    /// Already queued or running; nothing added.
    Duplicate,
    /// The tile failed recently and is not yet due for another attempt.
    BackingOff { retry_in: Duration },
    /// The request's generation is not the current one.
    Stale,
    /// The scheduler no longer accepts work.
    Closed,
}

impl Admission {
    /// True when the tile is queued, running or will be retried later.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Admission::Queued | Admission::Duplicate | Admission::BackingOff { .. }
        )
    }
}

/// Heap entry: priority order with FIFO tie-break.
#[derive(Debug)]
pub(crate) struct QueuedFetch {
    pub request: FetchRequest,
    pub sequence: u64,
}

impl PartialEq for QueuedFetch {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedFetch {}

impl PartialOrd for QueuedFetch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedFetch {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (older) first
        match self.request.priority.cmp(&other.request.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}
