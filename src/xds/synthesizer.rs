//! Certificate set to resource graph
//!
//! [`ConfigSynthesizer::build`] is a pure function of its input. Shared
//! resources are always emitted; per-hostname resources are built as a unit
//! and a hostname whose unit fails is dropped with a warning. The finished
//! graph then passes through the integrity check, which is the only failure
//! that rejects the whole build.

use std::collections::BTreeSet;
use std::sync::Arc;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::FilterChain;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tracing::{debug, warn};

use super::{cluster, listener, secret, DYNAMIC_FORWARD_PROXY_CLUSTER};
use crate::config::ProxyConfig;
use crate::domain::CertificateRecord;
use crate::validation::{
    check_integrity, validate_envoy_cluster, validate_envoy_filter_chain, validate_envoy_listener,
    validate_envoy_secret, IntegrityError,
};
use crate::xds::resources::ResourceGraph;

/// Build failures that reject the whole graph.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthesisError {
    #[error("shared resource '{resource}' failed validation: {message}")]
    Schema { resource: String, message: String },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Why one hostname was left out of the graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostBuildError {
    #[error("hostname appears in more than one record")]
    Duplicate,

    #[error("hostname collides with shared cluster '{0}'")]
    ReservedName(String),

    #[error("certificate is unusable: {0}")]
    Certificate(String),

    #[error("private key is unusable: {0}")]
    PrivateKey(String),

    #[error("{resource} failed validation: {message}")]
    Schema { resource: &'static str, message: String },
}

/// A hostname skipped during synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisWarning {
    pub sni: String,
    pub reason: HostBuildError,
}

/// A built graph together with the hostnames that did not make it in.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub graph: ResourceGraph,
    pub warnings: Vec<SynthesisWarning>,
}

struct HostArtifacts {
    chain: FilterChain,
    cluster: Cluster,
    certificate: Secret,
    validation: Secret,
}

/// Turns a point-in-time certificate snapshot into a [`ResourceGraph`].
#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    config: ProxyConfig,
}

impl ConfigSynthesizer {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn build(&self, records: &[Arc<CertificateRecord>]) -> Result<Synthesis, SynthesisError> {
        let mut clusters = vec![
            cluster::log_sink_cluster(
                &self.config.log_sink_cluster,
                &self.config.log_sink_address,
                self.config.log_sink_port,
            ),
            cluster::dynamic_forward_proxy_cluster(),
        ];
        for shared in &clusters {
            validate_envoy_cluster(shared).map_err(|e| SynthesisError::Schema {
                resource: shared.name.clone(),
                message: e.to_string(),
            })?;
        }

        let default_chain = listener::default_filter_chain(&self.config);
        validate_envoy_filter_chain(&default_chain).map_err(|e| SynthesisError::Schema {
            resource: "default filter chain".to_string(),
            message: e.to_string(),
        })?;

        let mut chains = vec![default_chain];
        let mut secrets = Vec::with_capacity(records.len() * 2);
        let mut warnings = Vec::new();
        let mut seen = BTreeSet::new();

        for record in records {
            let sni = record.sni();
            let built = if seen.insert(sni) {
                self.build_host(record)
            } else {
                Err(HostBuildError::Duplicate)
            };

            match built {
                Ok(host) => {
                    chains.push(host.chain);
                    clusters.push(host.cluster);
                    secrets.push(host.certificate);
                    secrets.push(host.validation);
                }
                Err(reason) => {
                    warn!(sni = %sni, reason = %reason, "Skipping hostname in synthesized configuration");
                    warnings.push(SynthesisWarning { sni: sni.to_string(), reason });
                }
            }
        }

        let listener = listener::listener(&self.config, chains);
        validate_envoy_listener(&listener).map_err(|e| SynthesisError::Schema {
            resource: listener.name.clone(),
            message: e.to_string(),
        })?;

        let graph = ResourceGraph { listener, clusters, secrets };
        check_integrity(&graph)?;

        debug!(
            hosts = graph.host_chains().count(),
            clusters = graph.clusters.len(),
            secrets = graph.secrets.len(),
            skipped = warnings.len(),
            "Synthesized resource graph"
        );

        Ok(Synthesis { graph, warnings })
    }

    /// Build every resource for one hostname, or none of them.
    fn build_host(&self, record: &CertificateRecord) -> Result<HostArtifacts, HostBuildError> {
        let sni = record.sni();
        if sni == self.config.log_sink_cluster || sni == DYNAMIC_FORWARD_PROXY_CLUSTER {
            return Err(HostBuildError::ReservedName(sni.to_string()));
        }

        check_certificate(record.certificate())?;
        check_private_key(record.private_key().expose_secret())?;

        let certificate = secret::tls_certificate_secret(record, self.config.include_ca_in_chain);
        let validation = secret::validation_context_secret(sni, &self.config.upstream_trusted_ca);
        let cluster = cluster::manual_upstream_cluster(sni);
        let chain = listener::host_filter_chain(sni, &self.config.access_log_path);

        validate_envoy_secret(&certificate).map_err(schema("certificate secret"))?;
        validate_envoy_secret(&validation).map_err(schema("validation secret"))?;
        validate_envoy_cluster(&cluster).map_err(schema("upstream cluster"))?;
        validate_envoy_filter_chain(&chain).map_err(schema("filter chain"))?;

        Ok(HostArtifacts { chain, cluster, certificate, validation })
    }
}

fn schema(resource: &'static str) -> impl Fn(crate::Error) -> HostBuildError {
    move |e| HostBuildError::Schema { resource, message: e.to_string() }
}

/// The leaf must be PEM and parse as X.509.
fn check_certificate(pem: &[u8]) -> Result<(), HostBuildError> {
    let leaf = CertificateDer::pem_slice_iter(pem)
        .next()
        .ok_or_else(|| HostBuildError::Certificate("no PEM certificate found".to_string()))?
        .map_err(|e| HostBuildError::Certificate(e.to_string()))?;

    x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| HostBuildError::Certificate(e.to_string()))?;
    Ok(())
}

fn check_private_key(pem: &[u8]) -> Result<(), HostBuildError> {
    PrivateKeyDer::from_pem_slice(pem)
        .map(|_| ())
        .map_err(|e| HostBuildError::PrivateKey(e.to_string()))
}
