//! Signing interface between the issuance coordinator and a CA.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;

use crate::domain::SecretBytes;

/// Certificate signing request in cfssl's CSR JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningRequest {
    #[serde(rename = "CN")]
    pub common_name: String,
    pub key: KeyRequest,
    pub hosts: Vec<String>,
}

impl SigningRequest {
    /// Request covering exactly one hostname.
    pub fn for_host(sni: &str, key: KeyRequest) -> Self {
        Self { common_name: sni.to_string(), key, hosts: vec![sni.to_string()] }
    }
}

/// Key to generate alongside the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRequest {
    pub algo: String,
    pub size: u32,
}

impl Default for KeyRequest {
    fn default() -> Self {
        Self { algo: "rsa".to_string(), size: 2048 }
    }
}

/// Output of a successful signing call.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: SecretBytes,
    /// Identifier of the CA that signed the certificate
    pub ca_name: String,
    /// CA chain to store alongside the certificate
    pub ca_bundle: Vec<u8>,
}

/// Errors surfaced by signer implementations.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("signer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("signer did not finish within {0:?}")]
    Timeout(Duration),

    #[error("signer returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("signing request rejected: {0}")]
    Rejected(String),

    #[error("I/O error while signing: {0}")]
    Io(#[from] std::io::Error),
}

/// A certificate authority able to mint leaf certificates.
#[async_trait]
pub trait Signer: Send + Sync + Debug {
    async fn sign(&self, request: &SigningRequest) -> Result<SignedCertificate, SignerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_as_cfssl_csr() {
        let request = SigningRequest::for_host("example.com", KeyRequest::default());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "CN": "example.com",
                "key": { "algo": "rsa", "size": 2048 },
                "hosts": ["example.com"]
            })
        );
    }

    #[test]
    fn test_signed_certificate_debug_hides_key() {
        let signed = SignedCertificate {
            certificate_pem: b"cert".to_vec(),
            private_key_pem: SecretBytes::new(b"very secret".to_vec()),
            ca_name: "intermediate-ca".to_string(),
            ca_bundle: Vec::new(),
        };
        assert!(!format!("{:?}", signed).contains("very secret"));
    }
}
