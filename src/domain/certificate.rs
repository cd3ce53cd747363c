//! Issued certificate records and their durable JSON form.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::SecretBytes;
use crate::{Error, Result};

/// A certificate minted for one intercepted hostname.
///
/// Records are immutable. Re-issuance means deleting the stored record and
/// letting the issuance path mint a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    sni: String,
    certificate: Vec<u8>,
    private_key: SecretBytes,
    ca_name: String,
    ca_bundle: Vec<u8>,
}

impl CertificateRecord {
    pub fn new(
        sni: impl Into<String>,
        certificate: Vec<u8>,
        private_key: SecretBytes,
        ca_name: impl Into<String>,
        ca_bundle: Vec<u8>,
    ) -> Result<Self> {
        let sni = sni.into();
        if sni.is_empty() {
            return Err(Error::validation_field("Certificate record requires a hostname", "sni"));
        }
        if certificate.is_empty() {
            return Err(Error::validation_field(
                format!("Certificate record for '{}' has no certificate", sni),
                "cert",
            ));
        }
        if private_key.is_empty() {
            return Err(Error::validation_field(
                format!("Certificate record for '{}' has no private key", sni),
                "key",
            ));
        }

        Ok(Self { sni, certificate, private_key, ca_name: ca_name.into(), ca_bundle })
    }

    pub fn sni(&self) -> &str {
        &self.sni
    }

    /// Leaf certificate PEM bytes.
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn private_key(&self) -> &SecretBytes {
        &self.private_key
    }

    pub fn ca_name(&self) -> &str {
        &self.ca_name
    }

    /// CA chain bytes used for this issuance.
    pub fn ca_bundle(&self) -> &[u8] {
        &self.ca_bundle
    }

    /// Decode a record from its stored JSON form.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut stored: StoredCertificate =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization {
                source: e,
                context: "Invalid certificate record".to_string(),
            })?;

        Self::new(
            std::mem::take(&mut stored.sni),
            std::mem::take(&mut stored.cert),
            SecretBytes::new(std::mem::take(&mut stored.key)),
            std::mem::take(&mut stored.ca_name),
            std::mem::take(&mut stored.ca),
        )
    }

    /// Encode the record to its stored JSON form, private key included.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let stored = StoredCertificate {
            sni: self.sni.clone(),
            key: self.private_key.expose_secret().to_vec(),
            cert: self.certificate.clone(),
            ca_name: self.ca_name.clone(),
            ca: self.ca_bundle.clone(),
        };

        serde_json::to_vec(&stored).map_err(|e| Error::Serialization {
            source: e,
            context: format!("Failed to encode certificate record for '{}'", self.sni),
        })
    }
}

impl fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("sni", &self.sni)
            .field("certificate_bytes", &self.certificate.len())
            .field("private_key", &self.private_key)
            .field("ca_name", &self.ca_name)
            .field("ca_bundle_bytes", &self.ca_bundle.len())
            .finish()
    }
}

/// On-disk layout: `{sni, key, cert, ca_name, ca}` with byte fields in
/// standard base64. A `null` byte field decodes as empty.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredCertificate {
    sni: String,
    #[serde(with = "base64_bytes")]
    key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    cert: Vec<u8>,
    #[serde(default)]
    ca_name: String,
    #[serde(with = "base64_bytes", default)]
    ca: Vec<u8>,
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(value) => base64::engine::general_purpose::STANDARD
                .decode(value.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
