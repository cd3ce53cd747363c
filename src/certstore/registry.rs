//! In-memory certificate registry mirroring the records directory.
//!
//! Every change to the map goes through [`CertificateRegistry::sync_path`],
//! which re-reads one path under a lock. The initial load, rescans and the
//! filesystem watch can therefore run concurrently without one overwriting
//! a newer observation made by another.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::store::RecordStore;
use super::watcher::{self, RegistryWatcher};
use crate::domain::CertificateRecord;
use crate::observability::MetricsRecorder;
use crate::Result;

/// Change notification emitted by the registry watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A record was created or its contents changed.
    Upserted { sni: String },
    /// A record's backing file disappeared.
    Removed { sni: String },
}

impl RegistryEvent {
    pub fn sni(&self) -> &str {
        match self {
            Self::Upserted { sni } | Self::Removed { sni } => sni,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upserted { .. } => "upserted",
            Self::Removed { .. } => "removed",
        }
    }
}

impl fmt::Display for RegistryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.sni())
    }
}

/// In-memory view of the durable certificate records, keyed by hostname.
///
/// Mutations take the write lock; [`CertificateRegistry::snapshot`] copies
/// out `Arc`s under the read lock so readers never hold it for long.
#[derive(Debug)]
pub struct CertificateRegistry {
    store: RecordStore,
    records: RwLock<BTreeMap<String, Arc<CertificateRecord>>>,
    /// Serializes check-read-apply for a path across load, rescan and watch.
    sync: Mutex<()>,
    metrics: MetricsRecorder,
}

impl CertificateRegistry {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            records: RwLock::new(BTreeMap::new()),
            sync: Mutex::new(()),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Hydrate the registry from storage.
    ///
    /// The scan is merged into the current map path by path, so changes the
    /// watch applies while it runs are kept. Malformed records are skipped
    /// with a warning. An unreadable storage directory is returned as an
    /// error.
    pub async fn load(&self) -> Result<usize> {
        let changes = self.resync().await?;
        let count = self.len();
        self.metrics.update_registry_records(count);

        info!(
            records_dir = %self.store.dir().display(),
            records = count,
            changes = changes.len(),
            "Certificate registry loaded"
        );
        Ok(count)
    }

    /// Start watching the storage directory.
    ///
    /// Returns the watch handle and the bounded stream of change events.
    /// Failing to establish the watch is fatal for the registry and is
    /// returned to the caller.
    pub fn watch(
        self: &Arc<Self>,
        buffer: usize,
    ) -> Result<(RegistryWatcher, mpsc::Receiver<RegistryEvent>)> {
        watcher::spawn(Arc::clone(self), buffer)
    }

    /// Point-in-time copy of every record, ordered by hostname.
    pub fn snapshot(&self) -> Vec<Arc<CertificateRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    pub fn get(&self, sni: &str) -> Option<Arc<CertificateRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).get(sni).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bring the entry behind `path` in line with what is on disk.
    ///
    /// Returns the change to announce, if any. A record that exists but
    /// fails to parse is logged and leaves the current entry untouched.
    pub(crate) async fn sync_path(&self, path: &Path) -> Option<RegistryEvent> {
        let sni = RecordStore::sni_for_path(path)?;
        let _sync = self.sync.lock().await;

        match tokio::fs::try_exists(path).await {
            Ok(true) => match self.store.read(path).await {
                Ok(record) => self.upsert(record).then_some(RegistryEvent::Upserted { sni }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed certificate record");
                    None
                }
            },
            Ok(false) => self.evict(&sni).then_some(RegistryEvent::Removed { sni }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat certificate record");
                None
            }
        }
    }

    /// Re-scan the whole directory, returning every change found.
    ///
    /// Entries missing from the listing are re-checked individually before
    /// eviction; a record created after the listing was taken stays.
    pub(crate) async fn resync(&self) -> Result<Vec<RegistryEvent>> {
        let paths = self.store.list().await?;
        let mut events = Vec::new();

        let mut on_disk = BTreeSet::new();
        for path in &paths {
            if let Some(sni) = RecordStore::sni_for_path(path) {
                on_disk.insert(sni);
            }
            if let Some(event) = self.sync_path(path).await {
                events.push(event);
            }
        }

        let unlisted: Vec<String> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|sni| !on_disk.contains(*sni))
            .cloned()
            .collect();

        for sni in unlisted {
            match self.store.path_for(&sni) {
                Ok(path) => {
                    if let Some(event) = self.sync_path(&path).await {
                        events.push(event);
                    }
                }
                Err(e) => warn!(sni = %sni, error = %e, "Cannot map registered hostname to a record path"),
            }
        }

        debug!(changes = events.len(), "Registry resynchronized with storage");
        Ok(events)
    }

    /// Insert or replace a record. Returns whether the map changed.
    fn upsert(&self, record: CertificateRecord) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.get(record.sni()).is_some_and(|existing| **existing == record) {
            return false;
        }
        debug!(sni = %record.sni(), "Registering certificate record");
        records.insert(record.sni().to_string(), Arc::new(record));
        self.metrics.update_registry_records(records.len());
        true
    }

    /// Drop a record. Returns whether it was present.
    fn evict(&self, sni: &str) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let removed = records.remove(sni).is_some();
        if removed {
            debug!(sni = %sni, "Evicted certificate record");
            self.metrics.update_registry_records(records.len());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SecretBytes;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn record(sni: &str, cert: &[u8]) -> CertificateRecord {
        CertificateRecord::new(
            sni,
            cert.to_vec(),
            SecretBytes::new(b"key".to_vec()),
            "intermediate-ca",
            b"ca".to_vec(),
        )
        .unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_load_skips_malformed_records() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        store.write(&record("a.example", b"cert-a")).await.unwrap();
        store.write(&record("b.example", b"cert-b")).await.unwrap();
        std::fs::write(dir.path().join("broken.example.json"), b"{not json").unwrap();

        let registry = CertificateRegistry::new(store);
        assert_eq!(registry.load().await.unwrap(), 2);

        let snis: Vec<String> =
            registry.snapshot().iter().map(|r| r.sni().to_string()).collect();
        assert_eq!(snis, vec!["a.example", "b.example"]);
        assert!(logs_contain("Skipping malformed certificate record"));
    }

    #[tokio::test]
    async fn test_load_merges_into_existing_entries() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let kept = store.write(&record("kept.example", b"cert")).await.unwrap();
        let gone = store.write(&record("gone.example", b"cert")).await.unwrap();

        let registry = CertificateRegistry::new(store.clone());
        registry.sync_path(&kept).await;
        registry.sync_path(&gone).await;
        std::fs::remove_file(&gone).unwrap();
        store.write(&record("new.example", b"cert")).await.unwrap();

        assert_eq!(registry.load().await.unwrap(), 2);
        assert!(registry.get("kept.example").is_some());
        assert!(registry.get("new.example").is_some());
        assert!(registry.get("gone.example").is_none());
    }

    #[tokio::test]
    async fn test_load_fails_when_directory_missing() {
        let registry = CertificateRegistry::new(RecordStore::new("/nonexistent/sniplane"));
        assert!(registry.load().await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_later_changes() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let path = store.write(&record("a.example", b"cert-a")).await.unwrap();

        let registry = CertificateRegistry::new(store);
        registry.load().await.unwrap();
        let before = registry.snapshot();

        std::fs::remove_file(&path).unwrap();
        assert_eq!(
            registry.sync_path(&path).await,
            Some(RegistryEvent::Removed { sni: "a.example".to_string() })
        );

        assert_eq!(before.len(), 1);
        assert!(registry.snapshot().is_empty());
        assert!(registry.get("a.example").is_none());
    }

    #[tokio::test]
    async fn test_sync_path_reports_only_real_changes() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let registry = CertificateRegistry::new(store.clone());

        let path = store.write(&record("a.example", b"cert-a")).await.unwrap();
        assert_eq!(
            registry.sync_path(&path).await,
            Some(RegistryEvent::Upserted { sni: "a.example".to_string() })
        );
        // same contents again: nothing to announce
        assert_eq!(registry.sync_path(&path).await, None);

        store.write(&record("a.example", b"cert-a2")).await.unwrap();
        assert!(matches!(registry.sync_path(&path).await, Some(RegistryEvent::Upserted { .. })));
        assert_eq!(registry.get("a.example").unwrap().certificate(), b"cert-a2");

        assert_eq!(registry.sync_path(&dir.path().join(".tmp123.tmp")).await, None);
    }

    #[tokio::test]
    async fn test_corrupted_update_keeps_previous_record() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let path = store.write(&record("a.example", b"cert-a")).await.unwrap();
        let registry = CertificateRegistry::new(store);
        registry.load().await.unwrap();

        std::fs::write(&path, b"garbage").unwrap();
        assert_eq!(registry.sync_path(&path).await, None);
        assert_eq!(registry.get("a.example").unwrap().certificate(), b"cert-a");
    }

    #[tokio::test]
    async fn test_resync_finds_additions_and_removals() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let stale = store.write(&record("stale.example", b"cert")).await.unwrap();
        let registry = CertificateRegistry::new(store.clone());
        registry.load().await.unwrap();

        std::fs::remove_file(stale).unwrap();
        store.write(&record("fresh.example", b"cert")).await.unwrap();

        let mut events = registry.resync().await.unwrap();
        events.sort_by(|a, b| a.sni().cmp(b.sni()));
        assert_eq!(
            events,
            vec![
                RegistryEvent::Upserted { sni: "fresh.example".to_string() },
                RegistryEvent::Removed { sni: "stale.example".to_string() },
            ]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_event_display() {
        let event = RegistryEvent::Removed { sni: "example.com".to_string() };
        assert_eq!(event.to_string(), "removed example.com");
        assert_eq!(event.kind(), "removed");
    }
}
