//! Startup and shutdown sequence for the control plane
//!
//! Components come up in dependency order:
//!
//! 1. certificate registry watch, then the initial load merged into it
//! 2. signer and issuance coordinator
//! 3. reconciler, which publishes once before serving triggers
//! 4. access log ingest server
//!
//! Shutdown runs in reverse: ingest stops accepting and joins (or, past the
//! grace period, cancels) in-flight issuance, the registry watch is released
//! and drained, then the reconciler finishes its in-flight run.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::certstore::{CertificateRegistry, RecordStore};
use crate::config::AppConfig;
use crate::issuance::{key_request_from_config, signer_from_config, IssuanceCoordinator};
use crate::reconciler::{DiscoveryPublisher, Reconciler};
use crate::xds::{serve_ingest, ConfigSynthesizer, SnapshotCache};
use crate::{Result, APP_NAME, VERSION};

/// Build the issuance coordinator described by `config`.
pub fn build_coordinator(config: &AppConfig) -> Result<Arc<IssuanceCoordinator>> {
    let store = RecordStore::new(&config.registry.records_dir);
    let signer = signer_from_config(&config.issuance)?;
    Ok(Arc::new(
        IssuanceCoordinator::new(store, signer)
            .with_key_request(key_request_from_config(&config.issuance)),
    ))
}

/// Run every component until `shutdown_signal` resolves.
///
/// `publisher` receives every accepted snapshot; the binary passes a
/// [`SnapshotCache`].
pub async fn run_control_plane<F>(
    config: AppConfig,
    publisher: Arc<dyn DiscoveryPublisher>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(app_name = APP_NAME, version = VERSION, "Starting sniplane control plane");

    let registry = Arc::new(CertificateRegistry::new(RecordStore::new(&config.registry.records_dir)));
    let (watcher, events) = registry.watch(config.registry.event_buffer)?;
    registry.load().await?;

    let coordinator = build_coordinator(&config)?;

    let reconciler = Reconciler::new(
        registry.clone(),
        ConfigSynthesizer::new(config.proxy.clone()),
        publisher,
        &config.reconciler,
    )
    .spawn(events);

    let shutdown = CancellationToken::new();
    let mut ingest = if config.ingest.enabled {
        let ingest_config = config.ingest.clone();
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            serve_ingest(&ingest_config, coordinator, async move { token.cancelled().await }).await
        }))
    } else {
        info!("Access log ingest disabled");
        None
    };

    let mut ingest_outcome = None;
    match ingest.as_mut() {
        Some(task) => tokio::select! {
            _ = shutdown_signal => info!("Shutdown signal received"),
            outcome = task => ingest_outcome = Some(outcome),
        },
        None => {
            shutdown_signal.await;
            info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    if ingest_outcome.is_none() {
        if let Some(task) = ingest {
            ingest_outcome = Some(task.await);
        }
    }

    let result = match ingest_outcome {
        None | Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(e))) => {
            error!(error = %e, "Ingest server terminated with error");
            Err(e)
        }
        Some(Err(e)) => {
            error!(error = %e, "Ingest server task failed");
            Err(crate::Error::internal(format!("Ingest task failed: {}", e)))
        }
    };

    if let Err(e) = watcher.stop().await {
        error!(error = %e, "Failed to stop registry watch cleanly");
    }

    let stats = reconciler.stats();
    reconciler.shutdown().await;
    info!(
        runs = stats.runs,
        published = stats.published,
        failures = stats.failures,
        "Control plane stopped"
    );

    result
}

/// Run with a fresh in-memory [`SnapshotCache`] as the publisher.
pub async fn run_with_snapshot_cache<F>(config: AppConfig, shutdown_signal: F) -> Result<Arc<SnapshotCache>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cache = Arc::new(SnapshotCache::new());
    run_control_plane(config, cache.clone(), shutdown_signal).await?;
    Ok(cache)
}
