//! In-flight forwarded queries, keyed by transaction id.
//!
//! Since UDP is stateless, upstream replies are routed back to the waiting
//! clients by the 16-bit id of the query that was forwarded. The first reply
//! to arrive drains the entry; anything after that finds nothing.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

struct PendingQuery {
    waiters: Vec<SocketAddr>,
    created_at: Instant,
}

/// Tracks which clients are waiting on each forwarded transaction id.
#[derive(Default)]
pub struct PendingQueries {
    entries: Mutex<FxHashMap<u16, PendingQuery>>,
}

impl PendingQueries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `addr` is waiting for the reply to `id`.
    ///
    /// A new waiter restarts the entry's age, so every client gets the full
    /// timeout before the entry is evicted.
    pub fn register(&self, id: u16, addr: SocketAddr) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let entry = entries.entry(id).or_insert_with(|| PendingQuery {
            waiters: Vec::new(),
            created_at: Instant::now(),
        });
        if !entry.waiters.contains(&addr) {
            entry.waiters.push(addr);
            entry.created_at = Instant::now();
        }
    }

    /// Remove and return every client waiting on `id`.
    pub fn drain(&self, id: u16) -> Option<Vec<SocketAddr>> {
        self.entries
            .lock()
            .ok()?
            .remove(&id)
            .map(|entry| entry.waiters)
    }

    /// Drop entries whose reply has not arrived within `max_age`.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < max_age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn drain_returns_all_waiters_once() {
        let pending = PendingQueries::new();
        pending.register(42, addr(1000));
        pending.register(42, addr(2000));

        assert_eq!(pending.drain(42), Some(vec![addr(1000), addr(2000)]));
        assert_eq!(pending.drain(42), None);
    }

    #[test]
    fn register_ignores_duplicate_waiter() {
        let pending = PendingQueries::new();
        pending.register(7, addr(1000));
        pending.register(7, addr(1000));

        assert_eq!(pending.drain(7), Some(vec![addr(1000)]));
    }

    #[test]
    fn ids_are_independent() {
        let pending = PendingQueries::new();
        pending.register(1, addr(1000));
        pending.register(2, addr(2000));

        assert_eq!(pending.drain(2), Some(vec![addr(2000)]));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn evict_stale_drops_old_entries() {
        let pending = PendingQueries::new();
        pending.register(1, addr(1000));

        assert_eq!(pending.evict_stale(Duration::from_secs(60)), 0);
        assert_eq!(pending.evict_stale(Duration::ZERO), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn new_waiter_restarts_the_entry_age() {
        let pending = PendingQueries::new();
        pending.register(1, addr(1000));
        std::thread::sleep(Duration::from_millis(200));
        pending.register(1, addr(2000));

        assert_eq!(pending.evict_stale(Duration::from_millis(150)), 0);
        assert_eq!(pending.drain(1), Some(vec![addr(1000), addr(2000)]));
    }

    #[test]
    fn duplicate_waiter_keeps_the_entry_age() {
        let pending = PendingQueries::new();
        pending.register(1, addr(1000));
        std::thread::sleep(Duration::from_millis(200));
        pending.register(1, addr(1000));

        assert_eq!(pending.evict_stale(Duration::from_millis(150)), 1);
    }

    #[test]
    fn concurrent_drains_deliver_each_waiter_once() {
        let pending = Arc::new(PendingQueries::new());
        for port in 0..64 {
            pending.register(9, addr(10_000 + port));
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pending = pending.clone();
                std::thread::spawn(move || pending.drain(9).unwrap_or_default())
            })
            .collect();
        let delivered: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();

        assert_eq!(delivered, 64);
    }
}
