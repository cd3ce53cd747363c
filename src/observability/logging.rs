//! # Structured Logging
//!
//! Subscriber setup and span macros built on the tracing ecosystem.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for one reconciliation pass.
///
/// ```rust,ignore
/// let span = reconcile_span!("default");
/// ```
#[macro_export]
macro_rules! reconcile_span {
    ($node:expr) => {
        tracing::info_span!(
            "reconcile",
            node_id = %$node,
            operation_id = %uuid::Uuid::new_v4(),
            version = tracing::field::Empty
        )
    };
}

/// Create a tracing span for one issuance attempt.
#[macro_export]
macro_rules! issuance_span {
    ($sni:expr) => {
        tracing::info_span!(
            "ensure_certificate",
            sni = %$sni,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Installing twice is not an
/// error: the first subscriber stays in place.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| crate::Error::config(format!("Invalid log level '{}': {}", config.log_level, e)))?;

    let installed = if config.json_logging {
        fmt().json().with_env_filter(filter).with_current_span(true).try_init()
    } else {
        fmt().compact().with_env_filter(filter).with_target(false).try_init()
    };

    if let Err(e) = installed {
        tracing::debug!(error = %e, "Global subscriber already installed, keeping it");
    }

    Ok(())
}

/// Log the effective configuration at startup.
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        records_dir = %config.registry.records_dir.display(),
        event_buffer = config.registry.event_buffer,
        signer = ?config.issuance.signer,
        signer_timeout_seconds = config.issuance.signer_timeout_seconds,
        listener = %format!(
            "{}:{}",
            config.proxy.listener_address, config.proxy.listener_port
        ),
        log_sink = %format!(
            "{}:{}",
            config.proxy.log_sink_address, config.proxy.log_sink_port
        ),
        node_id = %config.reconciler.node_id,
        reconcile_on_removal = config.reconciler.reconcile_on_removal,
        ingest_enabled = config.ingest.enabled,
        ingest_port = config.ingest.port,
        "Configuration loaded"
    );
}
