//! Envoy resource synthesis and the discovery-facing plumbing
//!
//! - [`synthesizer`] turns certificate records into a [`ResourceGraph`]
//! - [`state`] keeps the last published snapshot per node
//! - [`services`] receives TCP access logs and feeds observed SNI to issuance

pub mod access_log;
pub mod cluster;
pub mod listener;
pub mod resources;
pub mod route;
pub mod secret;
pub mod services;
pub mod state;
pub mod synthesizer;

pub use resources::{BuiltResource, ResourceGraph, ResourcesByType};
pub use services::SniIngestService;
pub use state::{Snapshot, SnapshotCache, SnapshotUpdate};
pub use synthesizer::{
    ConfigSynthesizer, HostBuildError, Synthesis, SynthesisError, SynthesisWarning,
};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use envoy_types::pb::envoy::service::accesslog::v3::access_log_service_server::AccessLogServiceServer;
use tonic::transport::Server;
use tracing::info;

use crate::config::IngestConfig;
use crate::issuance::IssuanceCoordinator;
use crate::Result;

/// Cluster that forwards non-intercepted traffic to the SNI it names.
pub const DYNAMIC_FORWARD_PROXY_CLUSTER: &str = "dynamic_forward_proxy_cluster";

/// DNS cache shared by the forward proxy filter and cluster.
pub const DNS_CACHE_NAME: &str = "dynamic_forward_proxy_cache_config";

/// Serve the access log ingest endpoint until `shutdown_signal` resolves.
pub async fn serve_ingest<F>(
    config: &IngestConfig,
    coordinator: Arc<IssuanceCoordinator>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| crate::Error::config(format!("Invalid ingest address: {}", e)))?;

    info!(address = %addr, "Starting access log ingest server");

    let service = SniIngestService::new(coordinator, config.max_concurrent_issuance);
    let served = Server::builder()
        .add_service(AccessLogServiceServer::new(service.clone()))
        .serve_with_shutdown(addr, shutdown_signal)
        .await;

    // Issuance started by the last streams is joined even if serving failed.
    service.drain(config.shutdown_grace()).await;

    served.map_err(|e| {
        let error_msg = e.to_string();
        if error_msg.contains("Address already in use") || error_msg.contains("bind") {
            crate::Error::transport(format!(
                "Ingest server failed to bind to {}: port {} is already in use",
                addr,
                addr.port()
            ))
        } else {
            crate::Error::transport(format!("Ingest server failed: {}", e))
        }
    })?;

    info!("Access log ingest server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certstore::RecordStore;
    use crate::issuance::LocalCaSigner;

    #[tokio::test]
    async fn test_rejects_unparseable_address() {
        let dir = tempfile::TempDir::new().unwrap();
        let signer = Arc::new(LocalCaSigner::generate("test-ca").unwrap());
        let coordinator = Arc::new(IssuanceCoordinator::new(RecordStore::new(dir.path()), signer));
        let config = IngestConfig { bind_address: "not an address".to_string(), ..Default::default() };

        let err = serve_ingest(&config, coordinator, async {}).await.unwrap_err();
        assert!(matches!(err, crate::Error::Config { .. }));
    }
}
