//! Secret resource builders for SDS (Secret Discovery Service)
//!
//! Each intercepted hostname gets two secrets: the TLS certificate the proxy
//! presents to clients, and the validation context used when it connects to
//! the real origin.

use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, data_source::Specifier, AggregatedConfigSource,
    ApiVersion, ConfigSource, DataSource,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, CertificateValidationContext, SdsSecretConfig, Secret, TlsCertificate,
};

use crate::domain::CertificateRecord;

const VALIDATION_SECRET_PREFIX: &str = "upstream-validation:";

/// Name of the TLS certificate secret for `sni`.
pub fn certificate_secret_name(sni: &str) -> String {
    sni.to_string()
}

/// Name of the origin validation secret for `sni`. `:` never appears in a
/// hostname, so it cannot collide with a certificate secret.
pub fn validation_secret_name(sni: &str) -> String {
    format!("{VALIDATION_SECRET_PREFIX}{sni}")
}

/// Secret reference resolved over the aggregated discovery stream.
pub fn sds_secret_config(name: &str) -> SdsSecretConfig {
    SdsSecretConfig {
        name: name.to_string(),
        sds_config: Some(ConfigSource {
            config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                AggregatedConfigSource::default(),
            )),
            resource_api_version: ApiVersion::V3 as i32,
            ..Default::default()
        }),
    }
}

/// Certificate chain and key served inline.
pub fn tls_certificate_secret(record: &CertificateRecord, include_ca_in_chain: bool) -> Secret {
    let mut chain = record.certificate().to_vec();
    if include_ca_in_chain && !record.ca_bundle().is_empty() {
        if !chain.ends_with(b"\n") {
            chain.push(b'\n');
        }
        chain.extend_from_slice(record.ca_bundle());
    }

    let certificate = TlsCertificate {
        certificate_chain: Some(inline_bytes(chain)),
        private_key: Some(inline_bytes(record.private_key().expose_secret().to_vec())),
        ..Default::default()
    };

    Secret {
        name: certificate_secret_name(record.sni()),
        r#type: Some(secret::Type::TlsCertificate(certificate)),
    }
}

/// Trust store the upstream cluster validates the origin against.
pub fn validation_context_secret(sni: &str, trusted_ca_path: &str) -> Secret {
    let context = CertificateValidationContext {
        trusted_ca: Some(DataSource {
            specifier: Some(Specifier::Filename(trusted_ca_path.to_string())),
            ..Default::default()
        }),
        ..Default::default()
    };

    Secret {
        name: validation_secret_name(sni),
        r#type: Some(secret::Type::ValidationContext(context)),
    }
}

fn inline_bytes(bytes: Vec<u8>) -> DataSource {
    DataSource { specifier: Some(Specifier::InlineBytes(bytes)), ..Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SecretBytes;

    fn record() -> CertificateRecord {
        CertificateRecord::new(
            "example.com",
            b"LEAF".to_vec(),
            SecretBytes::new(b"KEY".to_vec()),
            "intermediate-ca",
            b"CA".to_vec(),
        )
        .unwrap()
    }

    fn chain_bytes(secret: &Secret) -> Vec<u8> {
        match &secret.r#type {
            Some(secret::Type::TlsCertificate(cert)) => {
                match cert.certificate_chain.as_ref().and_then(|d| d.specifier.as_ref()) {
                    Some(Specifier::InlineBytes(bytes)) => bytes.clone(),
                    other => panic!("unexpected chain source: {other:?}"),
                }
            }
            other => panic!("expected TLS certificate, got {other:?}"),
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(certificate_secret_name("example.com"), "example.com");
        assert_eq!(validation_secret_name("example.com"), "upstream-validation:example.com");
    }

    #[test]
    fn test_certificate_secret_inlines_material() {
        let secret = tls_certificate_secret(&record(), false);
        assert_eq!(secret.name, "example.com");
        assert_eq!(chain_bytes(&secret), b"LEAF");

        match secret.r#type {
            Some(secret::Type::TlsCertificate(cert)) => {
                let key = cert.private_key.unwrap().specifier.unwrap();
                assert_eq!(key, Specifier::InlineBytes(b"KEY".to_vec()));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_certificate_secret_can_append_ca() {
        let secret = tls_certificate_secret(&record(), true);
        assert_eq!(chain_bytes(&secret), b"LEAF\nCA");
    }

    #[test]
    fn test_validation_secret_uses_trust_file() {
        let secret = validation_context_secret("example.com", "/etc/ssl/ca.pem");
        assert_eq!(secret.name, "upstream-validation:example.com");
        match secret.r#type {
            Some(secret::Type::ValidationContext(ctx)) => {
                assert_eq!(
                    ctx.trusted_ca.unwrap().specifier,
                    Some(Specifier::Filename("/etc/ssl/ca.pem".to_string()))
                );
            }
            other => panic!("expected validation context, got {other:?}"),
        }
    }

    #[test]
    fn test_sds_config_uses_ads() {
        let config = sds_secret_config("example.com");
        assert_eq!(config.name, "example.com");
        assert!(matches!(
            config.sds_config.unwrap().config_source_specifier,
            Some(ConfigSourceSpecifier::Ads(_))
        ));
    }
}
