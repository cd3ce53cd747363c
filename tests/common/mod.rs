//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{CertificateParams, KeyPair};
use sniplane::certstore::RecordStore;
use sniplane::domain::{CertificateRecord, SecretBytes};
use sniplane::reconciler::{DiscoveryPublisher, Version};
use sniplane::xds::ResourcesByType;
use tokio::sync::{mpsc, Semaphore};

/// A record with a real self-signed certificate for `sni`.
pub fn issued_record(sni: &str) -> CertificateRecord {
    let key = KeyPair::generate().unwrap();
    let cert = CertificateParams::new(vec![sni.to_string()]).unwrap().self_signed(&key).unwrap();
    CertificateRecord::new(
        sni,
        cert.pem().into_bytes(),
        SecretBytes::from(key.serialize_pem()),
        "test-ca",
        Vec::new(),
    )
    .unwrap()
}

/// A record that parses as JSON but carries unusable certificate material.
pub fn corrupt_record(sni: &str) -> CertificateRecord {
    CertificateRecord::new(
        sni,
        b"-----BEGIN CERTIFICATE-----\nbm90IGRlcg==\n-----END CERTIFICATE-----\n".to_vec(),
        SecretBytes::new(b"not a key".to_vec()),
        "test-ca",
        Vec::new(),
    )
    .unwrap()
}

pub async fn write_issued(dir: &Path, sni: &str) {
    RecordStore::new(dir).write(&issued_record(sni)).await.unwrap();
}

/// Publisher that keeps every publication.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    calls: Mutex<Vec<(Version, ResourcesByType)>>,
}

impl RecordingPublisher {
    pub fn versions(&self) -> Vec<Version> {
        self.calls.lock().unwrap().iter().map(|(v, _)| *v).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DiscoveryPublisher for RecordingPublisher {
    async fn publish(&self, _node_id: &str, version: Version, resources: ResourcesByType) -> sniplane::Result<()> {
        self.calls.lock().unwrap().push((version, resources));
        Ok(())
    }
}

/// Publisher that blocks each call until the test releases it.
///
/// Every call announces itself on `entered` before waiting on the gate.
#[derive(Debug)]
pub struct GatedPublisher {
    gate: Semaphore,
    entered: mpsc::UnboundedSender<Version>,
    inner: RecordingPublisher,
}

impl GatedPublisher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Version>) {
        let (entered, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { gate: Semaphore::new(0), entered, inner: RecordingPublisher::default() }), rx)
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub fn versions(&self) -> Vec<Version> {
        self.inner.versions()
    }
}

#[async_trait]
impl DiscoveryPublisher for GatedPublisher {
    async fn publish(&self, node_id: &str, version: Version, resources: ResourcesByType) -> sniplane::Result<()> {
        let _ = self.entered.send(version);
        self.gate.acquire().await.unwrap().forget();
        self.inner.publish(node_id, version, resources).await
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
