//! On-disk snapshots of the record cache.
//!
//! The primary file is replaced atomically on every save, after its previous
//! contents have been copied to the backup file. Snapshots are CBOR so every
//! record body round-trips without a schema of its own.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::cache::{CacheEntry, CacheKey, RecordCache, Snapshot};
use crate::error::PersistenceError;

const STORE_NAME: &str = "store";
const BACKUP_NAME: &str = "store_bk";
const TEMP_NAME: &str = "store.tmp";

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    entries: Vec<(CacheKey, CacheEntry)>,
}

/// Primary and backup snapshot files inside the read/write directory.
///
/// Clones share one write lock, so saves never interleave.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn primary_path(&self) -> PathBuf {
        self.dir.join(STORE_NAME)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_NAME)
    }

    /// Load the primary snapshot. `Ok(None)` means there is none yet.
    pub fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let path = self.primary_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        read_snapshot(&path, file).map(Some)
    }

    /// Back up the current primary file, then replace it with `snapshot`.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let primary = self.primary_path();
        if primary.exists() {
            fs::copy(&primary, self.backup_path())?;
        }

        let file = SnapshotFile {
            version: FORMAT_VERSION,
            entries: snapshot
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let temp = self.dir.join(TEMP_NAME);
        let mut writer = BufWriter::new(File::create(&temp)?);
        ciborium::into_writer(&file, &mut writer)
            .map_err(|e| PersistenceError::Encode(e.to_string()))?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| PersistenceError::Io(e.into_error()))?
            .sync_all()?;
        fs::rename(&temp, &primary)?;

        Ok(())
    }
}

fn read_snapshot(path: &Path, file: File) -> Result<Snapshot, PersistenceError> {
    let file: SnapshotFile = ciborium::from_reader(BufReader::new(file))
        .map_err(|e| PersistenceError::Decode(format!("{}: {}", path.display(), e)))?;
    if file.version != FORMAT_VERSION {
        return Err(PersistenceError::Decode(format!(
            "{}: unsupported snapshot version {}",
            path.display(),
            file.version
        )));
    }

    Ok(file.entries.into_iter().collect())
}

/// Spawn the background task that writes a snapshot after each change signal.
///
/// Signals that arrive while a write is in progress are folded into a single
/// follow-up write. The task exits when every sender is gone or the cache has
/// been dropped.
pub fn spawn_flusher(
    store: Store,
    cache: Weak<RecordCache>,
    mut signals: UnboundedReceiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while signals.recv().await.is_some() {
            while signals.try_recv().is_ok() {}

            let Some(cache) = cache.upgrade() else {
                break;
            };
            flush(&store, &cache).await;
        }
    })
}

/// Write the current cache contents on the blocking pool, logging failures.
pub async fn flush(store: &Store, cache: &Arc<RecordCache>) {
    let snapshot = cache.snapshot();
    let store = store.clone();
    let count = snapshot.len();

    match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
        Ok(Ok(())) => tracing::debug!(entries = count, "cache snapshot saved"),
        Ok(Err(e)) => tracing::error!("failed to save cache snapshot: {}", e),
        Err(e) => tracing::error!("cache snapshot task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordRequest, ResourceRecord, SoaFields};
    use tokio::sync::mpsc;

    fn record(host: &str, kind: &str, data: &str) -> ResourceRecord {
        let mut req = RecordRequest {
            host: host.to_string(),
            ttl: 300,
            record_type: kind.to_string(),
            data: data.to_string(),
            ..Default::default()
        };
        if kind == "SOA" {
            req.soa = SoaFields {
                ns: "ns1.example.com.".to_string(),
                mbox: "hostmaster.example.com.".to_string(),
                serial: 7,
                refresh: 3600,
                retry: 600,
                expire: 86400,
                min_ttl: 60,
            };
        }
        req.build().unwrap()
    }

    fn populated_cache() -> RecordCache {
        let cache = RecordCache::new();
        for rr in [
            record("example.com.", "A", "93.184.216.34"),
            record("example.com.", "AAAA", "2606:2800:220:1::248"),
            record("34.216.184.93.in-addr.arpa.", "PTR", "example.com."),
            record("example.com.", "SOA", ""),
        ] {
            cache.set(CacheKey::for_record(&rr), rr, None);
        }
        cache
    }

    fn canonical(snapshot: &Snapshot) -> Vec<(CacheKey, Vec<String>)> {
        let mut view: Vec<_> = snapshot
            .iter()
            .map(|(k, e)| (k.clone(), e.resources.iter().map(|r| r.canonical()).collect()))
            .collect();
        view.sort_by(|a, b| (a.0.name(), a.0.rtype()).cmp(&(b.0.name(), b.0.rtype())));
        view
    }

    #[test]
    fn load_without_primary_is_first_run() {
        let dir = tempfile::tempdir().unwrap();

        assert!(Store::new(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let snapshot = populated_cache().snapshot();

        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.len(), 4);
        assert_eq!(canonical(&loaded), canonical(&snapshot));
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn save_keeps_previous_primary_as_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let first = populated_cache().snapshot();
        store.save(&first).unwrap();
        assert!(!store.backup_path().exists());

        store.save(&Snapshot::default()).unwrap();

        let backup_path = store.backup_path();
        let backup = read_snapshot(&backup_path, File::open(&backup_path).unwrap()).unwrap();
        assert_eq!(backup, first);
        assert!(store.load().unwrap().unwrap().is_empty());
    }

    #[test]
    fn corrupt_primary_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        fs::write(store.primary_path(), b"\xff\x00garbage").unwrap();

        assert!(matches!(store.load(), Err(PersistenceError::Decode(_))));
    }

    #[tokio::test]
    async fn flusher_writes_after_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Arc::new(RecordCache::new().with_flush_signal(tx));
        let handle = spawn_flusher(store.clone(), Arc::downgrade(&cache), rx);

        let rr = record("example.com.", "A", "10.1.2.3");
        cache.set(CacheKey::for_record(&rr), rr, None);

        let expected = cache.snapshot();
        let mut saved = None;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if let Ok(Some(snapshot)) = store.load() {
                saved = Some(snapshot);
                break;
            }
        }
        assert_eq!(saved, Some(expected));

        drop(cache);
        handle.await.unwrap();
    }
}
