//! # Certificate Issuance
//!
//! On-demand signing of certificates for newly observed hostnames. The
//! [`IssuanceCoordinator`] checks durable storage, calls a [`Signer`] on a
//! miss and persists the result atomically.

pub mod cfssl;
pub mod coordinator;
pub mod local;
pub mod signer;

pub use cfssl::CfsslSigner;
pub use coordinator::{IssuanceCoordinator, IssuanceOutcome};
pub use local::LocalCaSigner;
pub use signer::{KeyRequest, SignedCertificate, Signer, SignerError, SigningRequest};

use std::sync::Arc;

use crate::config::{IssuanceConfig, SignerKind};
use crate::Result;

/// Build the signer selected by configuration.
pub fn signer_from_config(config: &IssuanceConfig) -> Result<Arc<dyn Signer>> {
    let signer: Arc<dyn Signer> = match config.signer {
        SignerKind::Cfssl => Arc::new(CfsslSigner::from_config(config)?),
        SignerKind::Local => {
            tracing::warn!(ca_name = %config.ca_name, "Signing with an ephemeral in-process CA");
            Arc::new(LocalCaSigner::generate(config.ca_name.clone())?)
        }
    };
    Ok(signer)
}

/// Key parameters from configuration.
pub fn key_request_from_config(config: &IssuanceConfig) -> KeyRequest {
    KeyRequest { algo: config.key_algorithm.clone(), size: config.key_size }
}
