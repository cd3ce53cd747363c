//! # Metrics Collection
//!
//! Counters and gauges for the control loop, recorded through the `metrics`
//! facade. Without an installed recorder every call is a no-op.

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};
use ::tracing::info;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks control-plane activity
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record the outcome of one `ensure_certificate` call
    pub fn record_issuance(&self, outcome: &'static str) {
        counter!("sniplane_certificates_issued_total", "outcome" => outcome).increment(1);
    }

    /// Record a registry change event
    pub fn record_registry_event(&self, kind: &'static str) {
        counter!("sniplane_registry_events_total", "kind" => kind).increment(1);
    }

    /// Update the gauge of records held in memory
    pub fn update_registry_records(&self, count: usize) {
        gauge!("sniplane_registry_records").set(count as f64);
    }

    /// Record the outcome of one reconciliation pass
    pub fn record_reconciliation(&self, outcome: &'static str) {
        counter!("sniplane_reconciliations_total", "outcome" => outcome).increment(1);
    }

    pub fn record_synthesis_warnings(&self, count: usize) {
        counter!("sniplane_synthesis_warnings_total").increment(count as u64);
    }

    pub fn update_published_version(&self, version: u64) {
        gauge!("sniplane_published_version").set(version as f64);
    }

    /// Register metric descriptions with the installed recorder
    pub fn describe(&self) {
        describe_counter!(
            "sniplane_certificates_issued_total",
            "Certificate issuance attempts by outcome"
        );
        describe_counter!("sniplane_registry_events_total", "Registry change events by kind");
        describe_gauge!("sniplane_registry_records", "Certificate records held in memory");
        describe_counter!("sniplane_reconciliations_total", "Reconciliation passes by outcome");
        describe_counter!(
            "sniplane_synthesis_warnings_total",
            "Hostnames dropped from synthesized graphs"
        );
        describe_gauge!("sniplane_published_version", "Last published snapshot version");
    }
}

/// Install the Prometheus exporter on the configured port
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::config(format!("Failed to install Prometheus exporter: {}", e)))?;

    MetricsRecorder::new().describe();

    info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}
