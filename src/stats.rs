//! Statistics tracking for the forwarder.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters, reset each time they are reported.
#[derive(Default)]
pub struct Stats {
    /// Queries received from clients.
    pub queries: AtomicU64,
    /// Queries answered from the cache.
    pub cached: AtomicU64,
    /// Queries sent on to the forwarders.
    pub forwarded: AtomicU64,
    /// Upstream replies relayed to waiting clients.
    pub relayed: AtomicU64,
    /// Upstream replies with no waiting client.
    pub late: AtomicU64,
    /// Datagrams dropped as malformed or unexpected.
    pub dropped: AtomicU64,
    /// Hook jobs queued.
    pub hooks: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cached(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late(&self) {
        self.late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hook(&self) {
        self.hooks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.swap(0, Ordering::Relaxed),
            cached: self.cached.swap(0, Ordering::Relaxed),
            forwarded: self.forwarded.swap(0, Ordering::Relaxed),
            relayed: self.relayed.swap(0, Ordering::Relaxed),
            late: self.late.swap(0, Ordering::Relaxed),
            dropped: self.dropped.swap(0, Ordering::Relaxed),
            hooks: self.hooks.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub cached: u64,
    pub forwarded: u64,
    pub relayed: u64,
    pub late: u64,
    pub dropped: u64,
    pub hooks: u64,
}

impl StatsSnapshot {
    /// Share of queries answered locally, in percent.
    pub fn hit_rate(&self) -> f64 {
        if self.queries == 0 {
            return 0.0;
        }
        self.cached as f64 * 100.0 / self.queries as f64
    }
}
