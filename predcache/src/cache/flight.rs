//! In-flight operation tracking for single-flight loads.
//!
//! The first caller for a key registers a [`Flight`] and does the work;
//! later callers find it in the flight table and block on it instead of
//! repeating the work. Every waiter receives a clone of the owner's result.

use parking_lot::{Condvar, Mutex};

use crate::cache::types::{CacheError, Tile};

/// What the owner of a flight is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlightKind {
    /// Producing a tile (disk read or computation).
    Load,
    /// Persisting an evicted tile to disk.
    WriteBack,
}

pub(crate) struct Flight {
    kind: FlightKind,
    outcome: Mutex<Option<Result<Tile, CacheError>>>,
    done: Condvar,
}

impl Flight {
    pub(crate) fn new(kind: FlightKind) -> Self {
        Self {
            kind,
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    pub(crate) fn kind(&self) -> FlightKind {
        self.kind
    }

    /// Block until the owner completes the flight.
    pub(crate) fn wait(&self) -> Result<Tile, CacheError> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }

    /// Publish the result and wake all waiters. Only the first call counts.
    pub(crate) fn complete(&self, result: Result<Tile, CacheError>) {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            *outcome = Some(result);
        }
        self.done.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        self.outcome.lock().is_some()
    }
}
