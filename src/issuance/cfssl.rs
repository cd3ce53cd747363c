//! Signer backed by the `cfssl` command-line tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::signer::{SignedCertificate, Signer, SignerError, SigningRequest};
use crate::config::IssuanceConfig;
use crate::domain::SecretBytes;
use crate::{Error, Result};

/// Runs `cfssl gencert` against an intermediate CA.
///
/// The CSR is written to the child's stdin and the JSON document cfssl
/// prints on stdout is parsed in memory, so nothing touches the disk. The
/// child is killed when it outlives the configured deadline.
#[derive(Debug, Clone)]
pub struct CfsslSigner {
    program: PathBuf,
    ca_cert: PathBuf,
    ca_key: PathBuf,
    config: PathBuf,
    profile: String,
    ca_name: String,
    ca_bundle: Vec<u8>,
    timeout: Option<Duration>,
}

#[derive(Deserialize)]
struct GencertOutput {
    cert: String,
    key: String,
}

impl CfsslSigner {
    /// Build the signer, reading the CA bundle once up front.
    pub fn from_config(config: &IssuanceConfig) -> Result<Self> {
        let bundle_path = config.ca_bundle.as_ref().unwrap_or(&config.ca_cert);
        let ca_bundle = std::fs::read(bundle_path).map_err(|e| {
            Error::io(format!("Failed to read CA bundle {}", bundle_path.display()), e)
        })?;

        Ok(Self {
            program: config.cfssl_binary.clone(),
            ca_cert: config.ca_cert.clone(),
            ca_key: config.ca_key.clone(),
            config: config.cfssl_config.clone(),
            profile: config.profile.clone(),
            ca_name: config.ca_name.clone(),
            ca_bundle,
            timeout: Some(config.signer_timeout()),
        })
    }

    /// Override the deadline; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("gencert")
            .arg("-ca")
            .arg(&self.ca_cert)
            .arg("-ca-key")
            .arg(&self.ca_key)
            .arg("-config")
            .arg(&self.config)
            .arg("-profile")
            .arg(&self.profile)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn parse_output(&self, stdout: &[u8]) -> std::result::Result<SignedCertificate, SignerError> {
        let output: GencertOutput = serde_json::from_slice(stdout)
            .map_err(|e| SignerError::MalformedOutput(e.to_string()))?;

        if output.cert.trim().is_empty() || output.key.trim().is_empty() {
            return Err(SignerError::MalformedOutput(
                "certificate or key missing from cfssl output".to_string(),
            ));
        }

        Ok(SignedCertificate {
            certificate_pem: output.cert.into_bytes(),
            private_key_pem: SecretBytes::from(output.key),
            ca_name: self.ca_name.clone(),
            ca_bundle: self.ca_bundle.clone(),
        })
    }
}

#[async_trait]
impl Signer for CfsslSigner {
    async fn sign(&self, request: &SigningRequest) -> std::result::Result<SignedCertificate, SignerError> {
        let csr = serde_json::to_vec(request).map_err(|e| SignerError::Rejected(e.to_string()))?;

        let mut child = self.command().spawn().map_err(|source| SignerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&csr).await?;
            stdin.shutdown().await?;
        }

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| SignerError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            return Err(SignerError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(cn = %request.common_name, profile = %self.profile, "cfssl signed certificate");
        self.parse_output(&output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::issuance::KeyRequest;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("cfssl");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn signer(dir: &TempDir, program: PathBuf) -> CfsslSigner {
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, b"-----BEGIN CERTIFICATE-----\nca\n-----END CERTIFICATE-----\n").unwrap();
        let config = IssuanceConfig {
            cfssl_binary: program,
            ca_cert: ca,
            ca_key: dir.path().join("ca-key.pem"),
            cfssl_config: dir.path().join("cfssl.json"),
            ..Default::default()
        };
        CfsslSigner::from_config(&config).unwrap()
    }

    fn request() -> SigningRequest {
        SigningRequest::for_host("example.com", KeyRequest::default())
    }

    #[tokio::test]
    async fn test_parses_gencert_json() {
        let dir = TempDir::new().unwrap();
        let program = script(
            &dir,
            r#"cat > /dev/null
echo '{"cert":"CERT-PEM","key":"KEY-PEM","csr":"CSR-PEM"}'"#,
        );

        let signed = signer(&dir, program).sign(&request()).await.unwrap();
        assert_eq!(signed.certificate_pem, b"CERT-PEM");
        assert_eq!(signed.private_key_pem.expose_secret(), b"KEY-PEM");
        assert_eq!(signed.ca_name, "intermediate-ca");
        assert!(signed.ca_bundle.starts_with(b"-----BEGIN CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn test_passes_csr_on_stdin() {
        let dir = TempDir::new().unwrap();
        let captured = dir.path().join("csr.json");
        let program = script(
            &dir,
            &format!(
                "cat > {}\necho '{{\"cert\":\"C\",\"key\":\"K\"}}'",
                captured.display()
            ),
        );

        signer(&dir, program).sign(&request()).await.unwrap();
        let csr: serde_json::Value =
            serde_json::from_slice(&std::fs::read(captured).unwrap()).unwrap();
        assert_eq!(csr["CN"], "example.com");
        assert_eq!(csr["hosts"][0], "example.com");
        assert_eq!(csr["key"]["algo"], "rsa");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let dir = TempDir::new().unwrap();
        let program = script(&dir, "cat > /dev/null\necho 'bad CA key' >&2\nexit 1");

        let err = signer(&dir, program).sign(&request()).await.unwrap_err();
        match err {
            SignerError::Failed { stderr, .. } => assert_eq!(stderr, "bad CA key"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_output() {
        let dir = TempDir::new().unwrap();
        let program = script(&dir, "cat > /dev/null\necho 'not json'");

        let err = signer(&dir, program).sign(&request()).await.unwrap_err();
        assert!(matches!(err, SignerError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn test_deadline_kills_slow_signer() {
        let dir = TempDir::new().unwrap();
        let program = script(&dir, "sleep 30");

        let err = signer(&dir, program)
            .with_timeout(Some(Duration::from_millis(200)))
            .sign(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = TempDir::new().unwrap();
        let err = signer(&dir, dir.path().join("does-not-exist"))
            .sign(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::Spawn { .. }));
    }

    #[test]
    fn test_missing_bundle_fails_construction() {
        let config = IssuanceConfig {
            ca_cert: PathBuf::from("/nonexistent/ca.pem"),
            ..Default::default()
        };
        assert!(CfsslSigner::from_config(&config).is_err());
    }
}
