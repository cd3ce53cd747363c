//! Envoy Access Log Service receiver that feeds certificate issuance.
//!
//! The default filter chain streams one TCP access log entry per connection.
//! Each entry carries the SNI the client offered; every non-empty hostname is
//! handed to the [`IssuanceCoordinator`]. A hostname already being issued is
//! skipped, and at most `max_concurrent_issuance` signings run at once.
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use envoy_types::pb::envoy::data::accesslog::v3::TcpAccessLogEntry;
use envoy_types::pb::envoy::service::accesslog::v3::{
    access_log_service_server::AccessLogService, stream_access_logs_message::LogEntries,
    StreamAccessLogsMessage, StreamAccessLogsResponse,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::issuance::IssuanceCoordinator;

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Access log sink that turns observed SNI values into issuance requests.
///
/// Clones share the in-flight set and the task tracker, so the copy handed
/// to the gRPC server and the one kept for [`SniIngestService::drain`] see
/// the same work.
#[derive(Debug, Clone)]
pub struct SniIngestService {
    coordinator: Arc<IssuanceCoordinator>,
    in_flight: InFlight,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

/// Clears a hostname from the in-flight set when its task ends, however it ends.
struct InFlightGuard {
    in_flight: InFlight,
    sni: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.sni);
    }
}

impl SniIngestService {
    pub fn new(coordinator: Arc<IssuanceCoordinator>, max_concurrent_issuance: usize) -> Self {
        Self {
            coordinator,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(max_concurrent_issuance.max(1))),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Hostnames present in one stream message, deduplicated, in order.
    ///
    /// HTTP log entries and TCP entries without TLS properties are ignored.
    pub fn observed_hostnames(message: &StreamAccessLogsMessage) -> Vec<String> {
        let Some(LogEntries::TcpLogs(entries)) = &message.log_entries else {
            return Vec::new();
        };

        let mut seen = BTreeSet::new();
        entries
            .log_entry
            .iter()
            .filter_map(sni_of)
            .filter(|sni| seen.insert(sni.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Start issuance for every hostname in `message` that is not already
    /// in flight. Returns how many issuances were started.
    ///
    /// Work runs on tracked tasks so a slow signer never stalls the log
    /// stream. Failures are logged by the coordinator; the next connection
    /// for the same name retries.
    pub fn ingest(&self, message: &StreamAccessLogsMessage) -> usize {
        Self::observed_hostnames(message).into_iter().filter(|sni| self.start(sni)).count()
    }

    /// Number of hostnames currently queued or being issued.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn start(&self, sni: &str) -> bool {
        if self.tasks.is_closed() {
            debug!(sni = %sni, "Ingest draining, not starting issuance");
            return false;
        }
        if !self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).insert(sni.to_string()) {
            debug!(sni = %sni, "Issuance already in flight");
            return false;
        }

        debug!(sni = %sni, "Observed SNI");
        let guard = InFlightGuard { in_flight: self.in_flight.clone(), sni: sni.to_string() };
        let coordinator = self.coordinator.clone();
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let sni = &guard.sni;
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(sni = %sni, "Issuance abandoned at shutdown");
                }
                _ = async {
                    let Ok(_permit) = permits.acquire().await else { return };
                    let _ = coordinator.ensure_certificate(sni).await;
                } => {}
            }
        });
        true
    }

    /// Stop accepting new hostnames and wait for in-flight issuance.
    ///
    /// Work still running after `grace` is cancelled. Records are written
    /// atomically, so an abandoned issuance leaves no partial file.
    pub async fn drain(&self, grace: Duration) {
        self.tasks.close();
        let pending = self.tasks.len();
        if pending == 0 {
            return;
        }

        info!(pending, "Waiting for in-flight issuance");
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(pending = self.tasks.len(), "Abandoning issuance still running after grace period");
            self.cancel.cancel();
            self.tasks.wait().await;
        }
    }
}

fn sni_of(entry: &TcpAccessLogEntry) -> Option<&str> {
    entry
        .common_properties
        .as_ref()
        .and_then(|common| common.tls_properties.as_ref())
        .map(|tls| tls.tls_sni_hostname.as_str())
        .filter(|sni| !sni.is_empty())
}

#[async_trait]
impl AccessLogService for SniIngestService {
    async fn stream_access_logs(
        &self,
        request: Request<tonic::Streaming<StreamAccessLogsMessage>>,
    ) -> Result<Response<StreamAccessLogsResponse>, Status> {
        let mut stream = request.into_inner();
        debug!("Access log stream opened");

        let mut message_count = 0usize;
        let mut started = 0usize;
        while let Some(message) = stream.message().await? {
            message_count += 1;
            if let Some(identifier) = &message.identifier {
                debug!(
                    node_id = %identifier.node.as_ref().map(|n| n.id.as_str()).unwrap_or_default(),
                    log_name = %identifier.log_name,
                    "Received access log message"
                );
            }
            started += self.ingest(&message);
        }

        info!(messages = message_count, issuances_started = started, "Access log stream completed");
        Ok(Response::new(StreamAccessLogsResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certstore::RecordStore;
    use crate::issuance::{LocalCaSigner, SignedCertificate, Signer, SignerError, SigningRequest};
    use envoy_types::pb::envoy::data::accesslog::v3::{
        AccessLogCommon, HttpAccessLogEntry, TlsProperties,
    };
    use envoy_types::pb::envoy::service::accesslog::v3::stream_access_logs_message::{
        HttpAccessLogEntries, TcpAccessLogEntries,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn tcp_entry(sni: Option<&str>) -> TcpAccessLogEntry {
        TcpAccessLogEntry {
            common_properties: Some(AccessLogCommon {
                tls_properties: sni.map(|sni| TlsProperties {
                    tls_sni_hostname: sni.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn tcp_message(entries: Vec<TcpAccessLogEntry>) -> StreamAccessLogsMessage {
        StreamAccessLogsMessage {
            log_entries: Some(LogEntries::TcpLogs(TcpAccessLogEntries { log_entry: entries })),
            ..Default::default()
        }
    }

    /// Local CA signer that sleeps before signing and counts calls.
    #[derive(Debug)]
    struct SlowSigner {
        inner: LocalCaSigner,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl SlowSigner {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner: LocalCaSigner::generate("test-ca").unwrap(),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Signer for SlowSigner {
        async fn sign(&self, request: &SigningRequest) -> Result<SignedCertificate, SignerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.sign(request).await
        }
    }

    #[test]
    fn test_hostnames_from_tcp_entries() {
        let message = tcp_message(vec![
            tcp_entry(Some("a.example")),
            tcp_entry(None),
            tcp_entry(Some("")),
            tcp_entry(Some("b.example")),
            tcp_entry(Some("a.example")),
        ]);

        assert_eq!(SniIngestService::observed_hostnames(&message), vec!["a.example", "b.example"]);
    }

    #[test]
    fn test_http_entries_are_ignored() {
        let message = StreamAccessLogsMessage {
            log_entries: Some(LogEntries::HttpLogs(HttpAccessLogEntries {
                log_entry: vec![HttpAccessLogEntry::default()],
            })),
            ..Default::default()
        };
        assert!(SniIngestService::observed_hostnames(&message).is_empty());
        assert!(SniIngestService::observed_hostnames(&StreamAccessLogsMessage::default()).is_empty());
    }

    #[tokio::test]
    async fn test_ingest_issues_certificates() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let signer = Arc::new(LocalCaSigner::generate("test-ca").unwrap());
        let service =
            SniIngestService::new(Arc::new(IssuanceCoordinator::new(store.clone(), signer)), 4);

        assert_eq!(service.ingest(&tcp_message(vec![tcp_entry(Some("api.example.com"))])), 1);
        service.drain(Duration::from_secs(10)).await;

        assert!(store.contains("api.example.com").await.unwrap());
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_repeated_host_signs_once_while_in_flight() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let signer = SlowSigner::new(Duration::from_millis(200));
        let service = SniIngestService::new(
            Arc::new(IssuanceCoordinator::new(store.clone(), signer.clone())),
            4,
        );

        let message = tcp_message(vec![tcp_entry(Some("a.example.com"))]);
        let started: usize = (0..10).map(|_| service.ingest(&message)).sum();
        assert_eq!(started, 1);
        assert_eq!(service.in_flight(), 1);

        service.drain(Duration::from_secs(10)).await;

        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        assert!(store.contains("a.example.com").await.unwrap());
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_abandons_work_past_grace() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let signer = SlowSigner::new(Duration::from_secs(3600));
        let service = SniIngestService::new(
            Arc::new(IssuanceCoordinator::new(store.clone(), signer.clone())),
            1,
        );

        assert_eq!(
            service.ingest(&tcp_message(vec![
                tcp_entry(Some("a.example.com")),
                tcp_entry(Some("b.example.com")),
            ])),
            2
        );
        // the first task reaches the signer; the second waits for a permit
        for _ in 0..100 {
            if signer.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.in_flight(), 2);

        service.drain(Duration::from_millis(50)).await;

        assert_eq!(service.in_flight(), 0);
        assert!(!store.contains("a.example.com").await.unwrap());
        // closed: nothing new starts
        assert_eq!(service.ingest(&tcp_message(vec![tcp_entry(Some("c.example.com"))])), 0);
    }
}
