//! Dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by `post` and the sender loop.
#[derive(Debug, Default)]
pub struct ManagerStats {
    /// Messages accepted into the queue.
    pub posted: AtomicU64,
    /// Messages whose action (and callback) completed.
    pub sent: AtomicU64,
    /// Messages whose action or callback errored or panicked.
    pub failed: AtomicU64,
    /// Messages refused: unknown priority at post, or saturated pool under
    /// `Backpressure::Reject`.
    pub rejected: AtomicU64,
}

/// Point-in-time copy of [`ManagerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub posted: u64,
    pub sent: u64,
    pub failed: u64,
    pub rejected: u64,
}

impl StatsSnapshot {
    /// Messages that left the queue and reached a final outcome.
    pub fn completed(&self) -> u64 {
        self.sent + self.failed
    }
}

impl ManagerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            posted: self.posted.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
