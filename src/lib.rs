//! # sniplane
//!
//! Control plane for a TLS-intercepting egress Envoy proxy. Clients connect
//! through the proxy; every hostname they name in SNI gets a certificate
//! signed by an operator-controlled CA, and the proxy is reconfigured to
//! terminate TLS for that hostname and re-originate it to the real origin.
//!
//! ## Architecture
//!
//! ```text
//! Envoy access log ─▶ SniIngestService ─▶ IssuanceCoordinator ─▶ record store
//!                                                                     │ watch
//! DiscoveryPublisher ◀─ Reconciler ◀─ ConfigSynthesizer ◀─ CertificateRegistry
//! ```
//!
//! - [`certstore`]: durable `<sni>.json` records and the in-memory registry
//! - [`issuance`]: on-demand signing through cfssl or a local CA
//! - [`xds`]: resource synthesis, snapshots and the access log receiver
//! - [`reconciler`]: serialized, coalescing publish loop

pub mod certstore;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod issuance;
pub mod observability;
pub mod reconciler;
pub mod startup;
pub mod validation;
pub mod xds;

pub use config::AppConfig;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
