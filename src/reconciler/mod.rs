//! # Reconciler
//!
//! The control loop between the certificate registry and the discovery
//! publisher. Runs are strictly serialized: triggers that arrive while a run
//! is in flight collapse into a single pending run.
//!
//! ```text
//! registry events ─┐
//! trigger() ───────┴─▶ pending flag ─▶ Idle → Synthesizing → Publishing → Idle
//! ```

pub mod publisher;
pub mod version;

pub use publisher::DiscoveryPublisher;
pub use version::{Version, VersionClock};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::certstore::{CertificateRegistry, RegistryEvent};
use crate::config::ReconcilerConfig;
use crate::observability::MetricsRecorder;
use crate::xds::synthesizer::ConfigSynthesizer;
use crate::Result;

/// Where the reconciliation task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    Synthesizing,
    Publishing,
}

/// Counters since the reconciler started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Triggers received, coalesced or not.
    pub triggers: u64,
    /// Runs started, including the startup run.
    pub runs: u64,
    pub published: u64,
    /// Runs that ended without publishing.
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    triggers: AtomicU64,
    runs: AtomicU64,
    published: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReconcilerStats {
        ReconcilerStats {
            triggers: self.triggers.load(Ordering::Relaxed),
            runs: self.runs.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Recomputes and publishes the proxy configuration.
#[derive(Debug)]
pub struct Reconciler {
    registry: Arc<CertificateRegistry>,
    synthesizer: ConfigSynthesizer,
    publisher: Arc<dyn DiscoveryPublisher>,
    node_id: String,
    reconcile_on_removal: bool,
    clock: VersionClock,
    state: watch::Sender<ReconcilerState>,
    last_version: watch::Sender<Option<Version>>,
    counters: Arc<Counters>,
    metrics: MetricsRecorder,
}

impl Reconciler {
    pub fn new(
        registry: Arc<CertificateRegistry>,
        synthesizer: ConfigSynthesizer,
        publisher: Arc<dyn DiscoveryPublisher>,
        config: &ReconcilerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ReconcilerState::Idle);
        let (last_version, _) = watch::channel(None);
        Self {
            registry,
            synthesizer,
            publisher,
            node_id: config.node_id.clone(),
            reconcile_on_removal: config.reconcile_on_removal,
            clock: VersionClock::new(),
            state,
            last_version,
            counters: Arc::new(Counters::default()),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// One full pass: snapshot, synthesize, check, publish.
    ///
    /// On any failure the previously published version stays authoritative
    /// and the error is returned; there is no retry until the next trigger.
    pub async fn reconcile_once(&mut self) -> Result<Version> {
        let span = crate::reconcile_span!(self.node_id);
        self.counters.runs.fetch_add(1, Ordering::Relaxed);

        let result = self.run().instrument(span).await;
        self.state.send_replace(ReconcilerState::Idle);

        match &result {
            Ok(version) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_reconciliation("published");
                self.last_version.send_replace(Some(*version));
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let outcome = if matches!(e, crate::Error::Synthesis(_)) { "rejected" } else { "failed" };
                self.metrics.record_reconciliation(outcome);
                let last_version = *self.last_version.borrow();
                error!(
                    node_id = %self.node_id,
                    error = %e,
                    last_version = ?last_version,
                    "Reconciliation failed; keeping previously published configuration"
                );
            }
        }
        result
    }

    async fn run(&mut self) -> Result<Version> {
        self.state.send_replace(ReconcilerState::Synthesizing);
        let records = self.registry.snapshot();
        let synthesis = self.synthesizer.build(&records)?;

        if !synthesis.warnings.is_empty() {
            self.metrics.record_synthesis_warnings(synthesis.warnings.len());
            warn!(
                skipped = synthesis.warnings.len(),
                hosts = ?synthesis.warnings.iter().map(|w| w.sni.as_str()).collect::<Vec<_>>(),
                "Some hostnames were left out of the configuration"
            );
        }

        let hosts = synthesis.graph.host_chains().count();
        let resources = synthesis.graph.into_resources();
        let version = self.clock.next();
        tracing::Span::current().record("version", tracing::field::display(version));

        self.state.send_replace(ReconcilerState::Publishing);
        self.publisher.publish(&self.node_id, version, resources).await?;

        info!(records = records.len(), hosts, "Reconciled configuration");
        Ok(version)
    }

    /// Run the startup reconciliation, then serve triggers until shutdown.
    ///
    /// Registry events are forwarded as triggers. `Removed` events only
    /// trigger when `reconcile_on_removal` is set.
    pub fn spawn(self, mut events: mpsc::Receiver<RegistryEvent>) -> ReconcilerHandle {
        let pending = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let counters = self.counters.clone();
        let state = self.state.subscribe();
        let last_version = self.last_version.subscribe();

        let forwarder = {
            let pending = pending.clone();
            let counters = counters.clone();
            let shutdown = shutdown.clone();
            let reconcile_on_removal = self.reconcile_on_removal;
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = events.recv() => event,
                    };
                    let Some(event) = event else {
                        debug!("Registry event stream closed");
                        break;
                    };

                    if matches!(event, RegistryEvent::Removed { .. }) && !reconcile_on_removal {
                        debug!(sni = %event.sni(), "Removal does not trigger reconciliation");
                        continue;
                    }
                    counters.triggers.fetch_add(1, Ordering::Relaxed);
                    pending.notify_one();
                }
            })
        };

        let task = {
            let pending = pending.clone();
            let shutdown = shutdown.clone();
            let mut reconciler = self;
            tokio::spawn(async move {
                info!(node_id = %reconciler.node_id, "Reconciler started");
                let _ = reconciler.reconcile_once().await;

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = pending.notified() => {
                            let _ = reconciler.reconcile_once().await;
                        }
                    }
                }
                info!(node_id = %reconciler.node_id, "Reconciler stopped");
            })
        };

        ReconcilerHandle { pending, shutdown, counters, state, last_version, task, forwarder }
    }
}

/// Control surface of a running [`Reconciler`].
#[derive(Debug)]
pub struct ReconcilerHandle {
    pending: Arc<Notify>,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
    state: watch::Receiver<ReconcilerState>,
    last_version: watch::Receiver<Option<Version>>,
    task: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Request a run. Coalesces with any other pending request.
    pub fn trigger(&self) {
        self.counters.triggers.fetch_add(1, Ordering::Relaxed);
        self.pending.notify_one();
    }

    pub fn state(&self) -> ReconcilerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReconcilerState> {
        self.state.clone()
    }

    /// Version of the last successful publication.
    pub fn last_version(&self) -> Option<Version> {
        *self.last_version.borrow()
    }

    pub fn subscribe_versions(&self) -> watch::Receiver<Option<Version>> {
        self.last_version.clone()
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.counters.snapshot()
    }

    /// Stop serving triggers. An in-flight run completes first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.forwarder.await {
            warn!(error = %e, "Registry event forwarder ended abnormally");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
    }
}
