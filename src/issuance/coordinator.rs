use std::sync::Arc;

use tracing::{debug, info, warn, Instrument};

use super::signer::{KeyRequest, Signer, SigningRequest};
use crate::certstore::RecordStore;
use crate::domain::CertificateRecord;
use crate::observability::MetricsRecorder;
use crate::{Error, Result};

/// Result of [`IssuanceCoordinator::ensure_certificate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceOutcome {
    /// A durable record already existed; the signer was not contacted.
    AlreadyProvisioned,
    /// A certificate was signed and persisted.
    Issued,
}

impl IssuanceOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyProvisioned => "already_provisioned",
            Self::Issued => "issued",
        }
    }
}

/// Turns "hostname observed" into "certificate durably exists".
///
/// The coordinator only ever writes to storage. The registry picks the new
/// record up through its watch, so the hand-off is eventually consistent.
///
/// Concurrent first-sight calls for the same hostname are not serialized:
/// both may sign and both may write. The records are equivalent and the
/// last rename wins.
#[derive(Debug, Clone)]
pub struct IssuanceCoordinator {
    store: RecordStore,
    signer: Arc<dyn Signer>,
    key: KeyRequest,
    metrics: MetricsRecorder,
}

impl IssuanceCoordinator {
    pub fn new(store: RecordStore, signer: Arc<dyn Signer>) -> Self {
        Self { store, signer, key: KeyRequest::default(), metrics: MetricsRecorder::new() }
    }

    /// Key parameters sent with every signing request.
    pub fn with_key_request(mut self, key: KeyRequest) -> Self {
        self.key = key;
        self
    }

    /// Make sure a certificate for `sni` exists in durable storage.
    pub async fn ensure_certificate(&self, sni: &str) -> Result<IssuanceOutcome> {
        let result = self.ensure(sni).instrument(crate::issuance_span!(sni)).await;

        match &result {
            Ok(outcome) => self.metrics.record_issuance(outcome.as_str()),
            Err(e) => {
                self.metrics.record_issuance("failed");
                warn!(sni = %sni, error = %e, "Certificate issuance failed");
            }
        }
        result
    }

    async fn ensure(&self, sni: &str) -> Result<IssuanceOutcome> {
        if sni.is_empty() {
            return Err(Error::validation_field("Hostname cannot be empty", "sni"));
        }

        if self.store.contains(sni).await? {
            debug!("Certificate already provisioned");
            return Ok(IssuanceOutcome::AlreadyProvisioned);
        }

        let request = SigningRequest::for_host(sni, self.key.clone());
        let signed = self.signer.sign(&request).await?;

        let record = CertificateRecord::new(
            sni,
            signed.certificate_pem,
            signed.private_key_pem,
            signed.ca_name,
            signed.ca_bundle,
        )?;
        let path = self.store.write(&record).await?;

        info!(path = %path.display(), ca = %record.ca_name(), "Issued certificate");
        Ok(IssuanceOutcome::Issued)
    }
}
