//! Record cache with TTL-based expiration.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::dns::Question;
use crate::record::ResourceRecord;

/// Source of the current time in unix seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Point-in-time copy of every cache entry.
pub type Snapshot = FxHashMap<CacheKey, CacheEntry>;

/// Wall clock in unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Cache key: owner name plus query type.
///
/// Names are stored lowercased in presentation form; non-printable label
/// bytes are escaped there, so the key stays binary-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    name: String,
    rtype: u16,
}

impl CacheKey {
    pub fn new(name: &str, rtype: u16) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            rtype,
        }
    }

    pub fn from_question(question: &Question) -> Self {
        Self::new(&question.name, question.qtype)
    }

    pub fn for_record(record: &ResourceRecord) -> Self {
        Self::new(&record.name, record.record_type().into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rtype(&self) -> u16 {
        self.rtype
    }
}

/// The answer set stored under one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub resources: Vec<ResourceRecord>,
    /// Lifetime in seconds; 0 and 1 mean the entry never expires.
    pub ttl: u32,
    /// Creation time in unix seconds.
    pub created_at: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl > 1 && self.created_at + u64::from(self.ttl) < now
    }
}

/// TTL-based record cache.
///
/// Readers share the lock; the expire-and-remove path on `get` re-checks the
/// entry under the write lock so a concurrent refresh is never discarded.
/// Successful mutations signal the persistence worker, if one is attached.
pub struct RecordCache {
    entries: RwLock<Snapshot>,
    clock: Clock,
    flush: Option<UnboundedSender<()>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            clock: Arc::new(unix_now),
            flush: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Send a signal on `flush` after every successful mutation.
    pub fn with_flush_signal(mut self, flush: UnboundedSender<()>) -> Self {
        self.flush = Some(flush);
        self
    }

    /// Look up the resources stored under `key`, dropping the entry if it expired.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<ResourceRecord>> {
        let now = (self.clock)();

        {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.resources.clone()),
                Some(_) => {}
            }
        }

        let Ok(mut entries) = self.entries.write() else {
            return None;
        };
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.resources.clone()),
            None => None,
        }
    }

    /// Add `record` under `key`, or replace the record equal to `old`.
    ///
    /// Returns false only when `old` is given and no stored record matches it.
    /// Appending a record equal to one already stored leaves the entry as is.
    pub fn set(&self, key: CacheKey, record: ResourceRecord, old: Option<&ResourceRecord>) -> bool {
        let now = (self.clock)();
        let (found, changed) = {
            let Ok(mut entries) = self.entries.write() else {
                return false;
            };

            match (entries.get_mut(&key), old) {
                (Some(entry), Some(old)) => {
                    match entry.resources.iter_mut().find(|r| r.same_as(old)) {
                        Some(slot) => {
                            *slot = record;
                            (true, true)
                        }
                        None => (false, false),
                    }
                }
                (Some(entry), None) => {
                    if entry.resources.iter().any(|r| r.same_as(&record)) {
                        (true, false)
                    } else {
                        entry.resources.push(record);
                        (true, true)
                    }
                }
                (None, Some(_)) => (false, false),
                (None, None) => {
                    let entry = CacheEntry {
                        ttl: record.ttl,
                        resources: vec![record],
                        created_at: now,
                    };
                    entries.insert(key, entry);
                    (true, true)
                }
            }
        };

        if changed {
            self.changed();
        }
        found
    }

    /// Replace the whole answer set under `key` and restart its lifetime.
    pub fn override_with(&self, key: CacheKey, resources: Vec<ResourceRecord>) {
        let entry = CacheEntry {
            ttl: resources.first().map(|r| r.ttl).unwrap_or(0),
            resources,
            created_at: (self.clock)(),
        };

        {
            let Ok(mut entries) = self.entries.write() else {
                return;
            };
            entries.insert(key, entry);
        }

        self.changed();
    }

    /// Remove the entry under `key`, or only the stored record equal to `record`.
    ///
    /// Removing the last record removes the entry.
    pub fn remove(&self, key: &CacheKey, record: Option<&ResourceRecord>) -> bool {
        let removed = {
            let Ok(mut entries) = self.entries.write() else {
                return false;
            };

            match record {
                None => entries.remove(key).is_some(),
                Some(record) => {
                    let Some(entry) = entries.get_mut(key) else {
                        return false;
                    };
                    match entry.resources.iter().position(|r| r.same_as(record)) {
                        Some(i) => {
                            entry.resources.remove(i);
                            // An entry never outlives its last record
                            if entry.resources.is_empty() {
                                entries.remove(key);
                            }
                            true
                        }
                        None => false,
                    }
                }
            }
        };

        if removed {
            self.changed();
        }
        removed
    }

    /// Copy every entry out from under the lock.
    pub fn snapshot(&self) -> Snapshot {
        self.entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Replace the contents with a previously saved snapshot.
    pub fn restore(&self, snapshot: Snapshot) {
        if let Ok(mut entries) = self.entries.write() {
            *entries = snapshot;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn changed(&self) {
        if let Some(flush) = &self.flush {
            let _ = flush.send(());
        }
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new()
    }
}
