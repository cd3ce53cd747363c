//! Filesystem watch feeding the certificate registry.
//!
//! notify delivers raw events on its own thread; they are pushed into a
//! bounded channel with `blocking_send` and consumed by one Tokio task that
//! applies them to the registry and emits [`RegistryEvent`]s on a second
//! bounded channel.

use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{CertificateRegistry, RegistryEvent};
use crate::observability::MetricsRecorder;
use crate::{Error, Result};

/// Handle owning the OS watch and the task that applies its events.
///
/// Call [`RegistryWatcher::stop`] to shut down: the OS watch is released
/// first, events already queued are drained into the registry, then the
/// task is joined and the change stream closes.
pub struct RegistryWatcher {
    watcher: Option<RecommendedWatcher>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RegistryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryWatcher")
            .field("watching", &self.watcher.is_some())
            .field("running", &self.task.as_ref().is_some_and(|task| !task.is_finished()))
            .finish()
    }
}

pub(crate) fn spawn(
    registry: Arc<CertificateRegistry>,
    buffer: usize,
) -> Result<(RegistryWatcher, mpsc::Receiver<RegistryEvent>)> {
    let dir = registry.store().dir().to_path_buf();
    if !dir.is_dir() {
        return Err(Error::registry(format!(
            "Records directory {} does not exist",
            dir.display()
        )));
    }

    let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<Event>>(buffer);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // Fails only once the consumer has shut down.
        let _ = raw_tx.blocking_send(res);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    let (event_tx, event_rx) = mpsc::channel(buffer);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run(registry, raw_rx, event_tx, shutdown.clone()));

    info!(records_dir = %dir.display(), buffer, "Watching certificate records");

    Ok((RegistryWatcher { watcher: Some(watcher), shutdown, task: Some(task) }, event_rx))
}

impl RegistryWatcher {
    /// Stop watching and wait for the event task to finish.
    pub async fn stop(mut self) -> Result<()> {
        drop(self.watcher.take());
        self.shutdown.cancel();

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::internal(format!("Registry watch task failed: {}", e)))?;
        }

        info!("Certificate registry watch stopped");
        Ok(())
    }
}

impl Drop for RegistryWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    registry: Arc<CertificateRegistry>,
    mut raw_rx: mpsc::Receiver<notify::Result<Event>>,
    event_tx: mpsc::Sender<RegistryEvent>,
    shutdown: CancellationToken,
) {
    let metrics = MetricsRecorder::new();

    // Anything written before the OS watch was in place.
    match registry.resync().await {
        Ok(events) => publish(&event_tx, events, &metrics).await,
        Err(e) => warn!(error = %e, "Initial registry resync failed"),
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = raw_rx.recv() => match received {
                Some(res) => {
                    let events = apply(&registry, res).await;
                    publish(&event_tx, events, &metrics).await;
                }
                None => return,
            },
        }
    }

    raw_rx.close();
    while let Some(res) = raw_rx.recv().await {
        let events = apply(&registry, res).await;
        publish(&event_tx, events, &metrics).await;
    }
    debug!("Registry watch drained");
}

async fn apply(registry: &CertificateRegistry, res: notify::Result<Event>) -> Vec<RegistryEvent> {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "Filesystem watch error");
            return Vec::new();
        }
    };

    if event.need_rescan() {
        warn!("Filesystem watch lost events, rescanning records");
        return match registry.resync().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Registry rescan failed");
                Vec::new()
            }
        };
    }

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
        _ => return Vec::new(),
    }

    let mut events = Vec::new();
    for path in &event.paths {
        if let Some(change) = registry.sync_path(path).await {
            events.push(change);
        }
    }
    events
}

async fn publish(
    event_tx: &mpsc::Sender<RegistryEvent>,
    events: Vec<RegistryEvent>,
    metrics: &MetricsRecorder,
) {
    for event in events {
        metrics.record_registry_event(event.kind());
        info!(sni = %event.sni(), kind = event.kind(), "Certificate registry changed");
        if event_tx.send(event).await.is_err() {
            debug!("Registry event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certstore::RecordStore;
    use crate::domain::{CertificateRecord, SecretBytes};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn record(sni: &str) -> CertificateRecord {
        CertificateRecord::new(
            sni,
            b"cert".to_vec(),
            SecretBytes::new(b"key".to_vec()),
            "intermediate-ca",
            Vec::new(),
        )
        .unwrap()
    }

    async fn next_event(rx: &mut mpsc::Receiver<RegistryEvent>) -> RegistryEvent {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for registry event")
            .expect("event stream closed")
    }

    #[test]
    fn test_watch_requires_existing_directory() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let registry = Arc::new(CertificateRegistry::new(RecordStore::new("/nonexistent/records")));
        let err = registry.watch(8).unwrap_err();
        assert!(matches!(err, Error::Registry { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watch_reports_create_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let registry = Arc::new(CertificateRegistry::new(store.clone()));
        registry.load().await.unwrap();

        let (watcher, mut events) = registry.watch(16).unwrap();

        store.write(&record("example.com")).await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            RegistryEvent::Upserted { sni: "example.com".to_string() }
        );
        assert!(registry.get("example.com").is_some());

        store.remove("example.com").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            RegistryEvent::Removed { sni: "example.com".to_string() }
        );
        assert!(registry.snapshot().is_empty());

        watcher.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_closes_event_stream() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(CertificateRegistry::new(RecordStore::new(dir.path())));
        let (watcher, mut events) = registry.watch(4).unwrap();

        watcher.stop().await.unwrap();
        let closed = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_changes_during_load_survive_it() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        for i in 0..300 {
            store.write(&record(&format!("h{:04}.example.com", i))).await.unwrap();
        }

        let registry = Arc::new(CertificateRegistry::new(store.clone()));
        let (watcher, _events) = registry.watch(1024).unwrap();

        let loading = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.load().await })
        };
        store.write(&record("zzz-late.example.com")).await.unwrap();
        store.remove("h0000.example.com").await.unwrap();
        loading.await.unwrap().unwrap();

        let settled = async {
            while registry.get("zzz-late.example.com").is_none()
                || registry.get("h0000.example.com").is_some()
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        timeout(Duration::from_secs(10), settled).await.expect("registry did not settle");
        assert_eq!(registry.len(), 300);

        // and nothing flips back afterwards
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.get("zzz-late.example.com").is_some());
        assert!(registry.get("h0000.example.com").is_none());

        watcher.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_records_written_before_watch_are_announced() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let registry = Arc::new(CertificateRegistry::new(store.clone()));
        registry.load().await.unwrap();

        // lands after load but before the watch starts
        store.write(&record("early.example")).await.unwrap();

        let (watcher, mut events) = registry.watch(16).unwrap();
        assert_eq!(
            next_event(&mut events).await,
            RegistryEvent::Upserted { sni: "early.example".to_string() }
        );
        watcher.stop().await.unwrap();
    }
}
