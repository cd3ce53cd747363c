//! # Configuration Settings
//!
//! Defines the configuration structure for the sniplane control plane.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub registry: RegistryConfig,

    #[validate(nested)]
    pub issuance: IssuanceConfig,

    /// Parameters of the synthesized proxy configuration
    #[validate(nested)]
    pub proxy: ProxyConfig,

    #[validate(nested)]
    pub reconciler: ReconcilerConfig,

    /// SNI ingestion (access-log service) server
    #[validate(nested)]
    pub ingest: IngestConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Checks that span more than one field
    fn validate_custom(&self) -> Result<()> {
        if self.issuance.signer == SignerKind::Cfssl {
            for (value, field) in [
                (&self.issuance.ca_cert, "issuance.ca_cert"),
                (&self.issuance.ca_key, "issuance.ca_key"),
                (&self.issuance.cfssl_config, "issuance.cfssl_config"),
            ] {
                if value.as_os_str().is_empty() {
                    return Err(Error::validation_field(
                        "The cfssl signer requires CA certificate, CA key and signing config paths",
                        field,
                    ));
                }
            }
        }

        if self.ingest.enabled
            && self.observability.enable_metrics
            && self.ingest.port == self.observability.metrics_port
        {
            return Err(Error::validation(
                "Ingest and metrics ports cannot be the same",
            ));
        }

        if self.proxy.log_sink_cluster == crate::xds::DYNAMIC_FORWARD_PROXY_CLUSTER {
            return Err(Error::validation_field(
                "Log sink cluster name collides with the dynamic forward proxy cluster",
                "proxy.log_sink_cluster",
            ));
        }

        Ok(())
    }
}

/// Certificate registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding one `<sni>.json` record per hostname
    pub records_dir: PathBuf,

    /// Capacity of the bounded change-event queue
    #[validate(range(min = 1, max = 65536, message = "Event buffer must be between 1 and 65536"))]
    pub event_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { records_dir: PathBuf::from("/app/certs"), event_buffer: 128 }
    }
}

/// Which signer mints certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    /// Shell out to the cfssl CLI with the intermediate CA
    Cfssl,
    /// Sign in process with an ephemeral CA (development only)
    Local,
}

/// Certificate issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IssuanceConfig {
    pub signer: SignerKind,

    /// Path or name of the cfssl executable
    pub cfssl_binary: PathBuf,

    pub ca_cert: PathBuf,

    pub ca_key: PathBuf,

    /// cfssl signing configuration (profiles)
    pub cfssl_config: PathBuf,

    #[validate(length(min = 1, message = "Signing profile cannot be empty"))]
    pub profile: String,

    /// CA chain stored alongside every issued certificate; defaults to `ca_cert`
    pub ca_bundle: Option<PathBuf>,

    #[validate(length(min = 1, message = "CA name cannot be empty"))]
    pub ca_name: String,

    /// Hard deadline for one signing call
    #[validate(range(min = 1, max = 600, message = "Signer timeout must be between 1 and 600 seconds"))]
    pub signer_timeout_seconds: u64,

    #[validate(length(min = 1, message = "Key algorithm cannot be empty"))]
    pub key_algorithm: String,

    #[validate(range(min = 256, max = 8192, message = "Key size must be between 256 and 8192"))]
    pub key_size: u32,
}

impl IssuanceConfig {
    pub fn signer_timeout(&self) -> Duration {
        Duration::from_secs(self.signer_timeout_seconds)
    }
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            signer: SignerKind::Cfssl,
            cfssl_binary: PathBuf::from("cfssl"),
            ca_cert: PathBuf::from("/app/certs/intermediate-ca.crt"),
            ca_key: PathBuf::from("/app/certs/intermediate-ca.key"),
            cfssl_config: PathBuf::from("/app/cfssl.json"),
            profile: "certificate".to_string(),
            ca_bundle: None,
            ca_name: "intermediate-ca".to_string(),
            signer_timeout_seconds: 30,
            key_algorithm: "rsa".to_string(),
            key_size: 2048,
        }
    }
}

/// Synthesis parameters for the generated proxy resources
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProxyConfig {
    #[validate(length(min = 1, message = "Listener name cannot be empty"))]
    pub listener_name: String,

    #[validate(length(min = 1, message = "Listener address cannot be empty"))]
    pub listener_address: String,

    #[validate(range(min = 1, message = "Listener port must be between 1 and 65535"))]
    pub listener_port: u16,

    #[validate(length(min = 1, message = "Log sink cluster name cannot be empty"))]
    pub log_sink_cluster: String,

    #[validate(length(min = 1, message = "Log sink address cannot be empty"))]
    pub log_sink_address: String,

    #[validate(range(min = 1, message = "Log sink port must be between 1 and 65535"))]
    pub log_sink_port: u16,

    #[validate(length(min = 1, message = "Access log path cannot be empty"))]
    pub access_log_path: String,

    /// Trust store used to verify real origins
    #[validate(length(min = 1, message = "Upstream trusted CA path cannot be empty"))]
    pub upstream_trusted_ca: String,

    /// Append the CA bundle to the leaf in the served certificate chain
    pub include_ca_in_chain: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listener_name: "listener_0".to_string(),
            listener_address: "0.0.0.0".to_string(),
            listener_port: 8443,
            log_sink_cluster: "envoy_access_log_service".to_string(),
            log_sink_address: "als_service".to_string(),
            log_sink_port: 50051,
            access_log_path: "/dev/stdout".to_string(),
            upstream_trusted_ca: "/etc/ssl/certs/ca-certificates.crt".to_string(),
            include_ca_in_chain: false,
        }
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Node identity the snapshots are published for
    #[validate(length(min = 1, message = "Node id cannot be empty"))]
    pub node_id: String,

    /// Recompute the graph when a record is deleted from storage
    pub reconcile_on_removal: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { node_id: "default".to_string(), reconcile_on_removal: true }
    }
}

/// Access-log ingestion server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,

    #[validate(length(min = 1, message = "Ingest bind address cannot be empty"))]
    pub bind_address: String,

    #[validate(range(min = 1, message = "Ingest port must be between 1 and 65535"))]
    pub port: u16,

    /// Upper bound on hostnames being issued at the same time
    #[validate(range(min = 1, max = 1024, message = "Issuance concurrency must be between 1 and 1024"))]
    pub max_concurrent_issuance: usize,

    /// How long shutdown waits for in-flight issuance before abandoning it
    pub shutdown_grace_seconds: u64,
}

impl IngestConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 50051,
            max_concurrent_issuance: 8,
            shutdown_grace_seconds: 10,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Expose Prometheus metrics
    pub enable_metrics: bool,

    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            service_name: "sniplane".to_string(),
            enable_metrics: false,
            metrics_port: 9090,
        }
    }
}
