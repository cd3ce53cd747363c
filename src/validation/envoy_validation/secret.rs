use crate::{Error, Result};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{secret, Secret};

use super::helpers::{data_source_check, encode_check};

pub fn validate_envoy_secret(secret: &Secret) -> Result<()> {
    encode_check(secret, "Invalid secret configuration")?;

    if secret.name.is_empty() {
        return Err(Error::validation_field("Secret name cannot be empty", "name"));
    }

    match &secret.r#type {
        Some(secret::Type::TlsCertificate(certificate)) => {
            data_source_check(certificate.certificate_chain.as_ref(), "certificate_chain")?;
            data_source_check(certificate.private_key.as_ref(), "private_key")
        }
        Some(secret::Type::ValidationContext(context)) => {
            data_source_check(context.trusted_ca.as_ref(), "trusted_ca")
        }
        Some(_) => Ok(()),
        None => Err(Error::validation_field("Secret type is required", "type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CertificateRecord, SecretBytes};
    use crate::xds::secret::{tls_certificate_secret, validation_context_secret};

    #[test]
    fn synthesized_secrets_pass() {
        let record = CertificateRecord::new(
            "example.com",
            b"CERT".to_vec(),
            SecretBytes::new(b"KEY".to_vec()),
            "ca",
            Vec::new(),
        )
        .unwrap();
        assert!(validate_envoy_secret(&tls_certificate_secret(&record, false)).is_ok());
        assert!(validate_envoy_secret(&validation_context_secret("example.com", "/ca.pem")).is_ok());
    }

    #[test]
    fn empty_trust_store_is_rejected() {
        assert!(validate_envoy_secret(&validation_context_secret("example.com", "")).is_err());
    }

    #[test]
    fn untyped_secret_is_rejected() {
        let secret = Secret { name: "example.com".to_string(), r#type: None };
        assert!(validate_envoy_secret(&secret).is_err());
    }
}
