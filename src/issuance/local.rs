//! In-process signer with an ephemeral CA, for development and tests.

use std::fmt;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::signer::{SignedCertificate, Signer, SignerError, SigningRequest};
use crate::domain::SecretBytes;

/// Signs leaf certificates with a CA generated at construction time.
///
/// Keys are ECDSA P-256 whatever the request asks for; the CA only lives as
/// long as the process.
pub struct LocalCaSigner {
    ca_cert: Certificate,
    ca_key: KeyPair,
    ca_name: String,
    validity: Duration,
}

impl fmt::Debug for LocalCaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCaSigner")
            .field("ca_name", &self.ca_name)
            .field("validity_days", &self.validity.whole_days())
            .finish()
    }
}

fn rcgen_error(context: &str, err: rcgen::Error) -> SignerError {
    SignerError::Rejected(format!("{}: {}", context, err))
}

impl LocalCaSigner {
    /// Generate a fresh self-signed CA named `ca_name`.
    pub fn generate(ca_name: impl Into<String>) -> Result<Self, SignerError> {
        let ca_name = ca_name.into();
        let ca_key = KeyPair::generate().map_err(|e| rcgen_error("CA key generation", e))?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, ca_name.clone());
        params.distinguished_name.push(DnType::OrganizationName, "sniplane");
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(365);

        let ca_cert =
            params.self_signed(&ca_key).map_err(|e| rcgen_error("CA self-signing", e))?;

        Ok(Self { ca_cert, ca_key, ca_name, validity: Duration::days(90) })
    }

    /// PEM of the CA certificate, for trust stores in tests and dev setups.
    pub fn ca_certificate_pem(&self) -> String {
        self.ca_cert.pem()
    }
}

#[async_trait]
impl Signer for LocalCaSigner {
    async fn sign(&self, request: &SigningRequest) -> Result<SignedCertificate, SignerError> {
        if request.hosts.is_empty() {
            return Err(SignerError::Rejected("request names no hosts".to_string()));
        }

        let key = KeyPair::generate().map_err(|e| rcgen_error("leaf key generation", e))?;
        let mut params = CertificateParams::new(request.hosts.clone())
            .map_err(|e| rcgen_error("invalid host", e))?;
        params.distinguished_name.push(DnType::CommonName, request.common_name.clone());
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::hours(1);
        params.not_after = now + self.validity;

        let cert = params
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .map_err(|e| rcgen_error("leaf signing", e))?;

        debug!(cn = %request.common_name, ca = %self.ca_name, "Signed certificate with local CA");

        Ok(SignedCertificate {
            certificate_pem: cert.pem().into_bytes(),
            private_key_pem: SecretBytes::from(key.serialize_pem()),
            ca_name: self.ca_name.clone(),
            ca_bundle: self.ca_cert.pem().into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::KeyRequest;
    use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};

    #[tokio::test]
    async fn test_signs_parseable_leaf_for_host() {
        let signer = LocalCaSigner::generate("test-ca").unwrap();
        let signed = signer
            .sign(&SigningRequest::for_host("example.com", KeyRequest::default()))
            .await
            .unwrap();

        let certs: Vec<CertificateDer<'static>> =
            CertificateDer::pem_slice_iter(&signed.certificate_pem)
                .collect::<Result<_, _>>()
                .unwrap();
        assert_eq!(certs.len(), 1);
        assert!(PrivateKeyDer::from_pem_slice(signed.private_key_pem.expose_secret()).is_ok());

        let (_, parsed) = x509_parser::parse_x509_certificate(certs[0].as_ref()).unwrap();
        let san = parsed.subject_alternative_name().unwrap().unwrap();
        assert!(san.value.general_names.iter().any(|name| {
            matches!(name, x509_parser::extensions::GeneralName::DNSName("example.com"))
        }));
        assert_eq!(signed.ca_name, "test-ca");
        assert_eq!(signed.ca_bundle, signer.ca_certificate_pem().into_bytes());
    }

    #[tokio::test]
    async fn test_rejects_requests_without_hosts() {
        let signer = LocalCaSigner::generate("test-ca").unwrap();
        let request = SigningRequest {
            common_name: "example.com".to_string(),
            key: KeyRequest::default(),
            hosts: Vec::new(),
        };
        assert!(matches!(signer.sign(&request).await, Err(SignerError::Rejected(_))));
    }
}
