use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::observability::MetricsRecorder;
use crate::reconciler::{DiscoveryPublisher, Version};
use crate::xds::resources::{BuiltResource, ResourcesByType};
use crate::{Error, Result};

/// Complete resource set published for one node at one version.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub version: Version,
    pub resources: ResourcesByType,
}

impl Snapshot {
    pub fn resources(&self, type_url: &str) -> &[BuiltResource] {
        self.resources.get(type_url).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn resource_names(&self, type_url: &str) -> Vec<&str> {
        self.resources(type_url).iter().map(|r| r.name.as_str()).collect()
    }
}

/// Delta information for a single type URL.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceDelta {
    pub type_url: String,
    pub added_or_updated: Vec<BuiltResource>,
    pub removed: Vec<String>,
}

/// Broadcast payload describing one accepted publication.
#[derive(Clone, Debug)]
pub struct SnapshotUpdate {
    pub node_id: String,
    pub version: Version,
    pub snapshot: Arc<Snapshot>,
    pub deltas: Vec<ResourceDelta>,
}

/// Latest snapshot per node, for a discovery server to stream from.
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
    update_tx: broadcast::Sender<Arc<SnapshotUpdate>>,
    metrics: MetricsRecorder,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(128);
        Self { snapshots: RwLock::new(HashMap::new()), update_tx, metrics: MetricsRecorder::new() }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<Arc<SnapshotUpdate>> {
        self.update_tx.subscribe()
    }

    pub fn snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        snapshots.get(node_id).cloned()
    }

    pub fn version(&self, node_id: &str) -> Option<Version> {
        self.snapshot(node_id).map(|snapshot| snapshot.version)
    }

    /// Replace the snapshot for `node_id`. The version must be newer than the
    /// one currently held.
    pub fn set_snapshot(
        &self,
        node_id: &str,
        version: Version,
        resources: ResourcesByType,
    ) -> Result<Arc<SnapshotUpdate>> {
        let snapshot = Arc::new(Snapshot { version, resources });

        let previous = {
            let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
            let previous = snapshots.get(node_id).cloned();
            if let Some(current) = &previous {
                if version <= current.version {
                    return Err(Error::publish(
                        format!(
                            "Version {} does not advance past published version {}",
                            version, current.version
                        ),
                        node_id,
                    ));
                }
            }
            snapshots.insert(node_id.to_string(), snapshot.clone());
            previous
        };

        let deltas = compute_deltas(previous.as_deref(), &snapshot);
        for delta in &deltas {
            debug!(
                node_id = %node_id,
                type_url = %delta.type_url,
                added = delta.added_or_updated.len(),
                removed = delta.removed.len(),
                version = %version,
                "Snapshot delta"
            );
        }

        let update = Arc::new(SnapshotUpdate {
            node_id: node_id.to_string(),
            version,
            snapshot,
            deltas,
        });
        let _ = self.update_tx.send(update.clone());
        Ok(update)
    }
}

#[async_trait]
impl DiscoveryPublisher for SnapshotCache {
    async fn publish(&self, node_id: &str, version: Version, resources: ResourcesByType) -> Result<()> {
        let update = self.set_snapshot(node_id, version, resources)?;
        self.metrics.update_published_version(version.get());
        info!(
            node_id = %node_id,
            version = %version,
            changed_types = update.deltas.len(),
            "Published snapshot"
        );
        Ok(())
    }
}

fn compute_deltas(previous: Option<&Snapshot>, next: &Snapshot) -> Vec<ResourceDelta> {
    let type_urls: BTreeSet<&String> = next
        .resources
        .keys()
        .chain(previous.into_iter().flat_map(|p| p.resources.keys()))
        .collect();

    let mut deltas = Vec::new();
    for type_url in type_urls {
        let old: BTreeMap<&str, &BuiltResource> = previous
            .map(|p| p.resources(type_url).iter().map(|r| (r.name.as_str(), r)).collect())
            .unwrap_or_default();
        let new = next.resources(type_url);

        let added_or_updated: Vec<BuiltResource> = new
            .iter()
            .filter(|r| old.get(r.name.as_str()).is_none_or(|existing| existing.resource != r.resource))
            .cloned()
            .collect();
        let new_names: BTreeSet<&str> = new.iter().map(|r| r.name.as_str()).collect();
        let removed: Vec<String> = old
            .keys()
            .filter(|name| !new_names.contains(*name))
            .map(|name| name.to_string())
            .collect();

        if !added_or_updated.is_empty() || !removed.is_empty() {
            deltas.push(ResourceDelta { type_url: type_url.clone(), added_or_updated, removed });
        }
    }
    deltas
}
