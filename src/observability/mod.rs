//! # Observability Infrastructure
//!
//! Structured logging and metrics for the sniplane control plane.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and, when enabled, the metrics exporter.
///
/// Must run inside a Tokio runtime when metrics are enabled.
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;

    if config.enable_metrics {
        init_metrics(config)?;
    }

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        metrics_enabled = config.enable_metrics,
        "Observability initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_observability_without_metrics() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_observability(&config).is_ok());
    }
}
