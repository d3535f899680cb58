//! Exponential backoff for failed fetches.

use std::time::{Duration, Instant};

/// Default delay after the first failure.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(250);

/// Default upper bound on the delay.
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(30);

/// Backoff applied to a tile after a failed fetch.
///
/// The n-th consecutive failure blocks re-admission for
/// `base_delay * 2^(n-1)`, capped at `max_delay`. Attempts are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RETRY_BASE,
            max_delay: DEFAULT_RETRY_MAX,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Retry immediately after any failure.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay after `failures` consecutive failures (at least one).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Failure history of one tile.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    pub failures: u32,
    pub retry_at: Instant,
}

impl Backoff {
    /// Record one more failure at `now`.
    pub fn after_failure(previous: Option<Backoff>, policy: &RetryPolicy, now: Instant) -> Self {
        let failures = previous.map_or(1, |b| b.failures.saturating_add(1));
        Self {
            failures,
            retry_at: now + policy.delay_for(failures),
        }
    }

    /// Time left before the tile may be re-admitted.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let remaining = self.retry_at.saturating_duration_since(now);
        (!remaining.is_zero()).then_some(remaining)
    }
}
