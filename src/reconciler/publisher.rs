use std::fmt::Debug;

use async_trait::async_trait;

use super::Version;
use crate::xds::resources::ResourcesByType;
use crate::Result;

/// Destination for complete, versioned resource sets.
///
/// Called at most once per reconciliation run, always from the single
/// reconciliation task, with every resource type present.
#[async_trait]
pub trait DiscoveryPublisher: Send + Sync + Debug {
    async fn publish(&self, node_id: &str, version: Version, resources: ResourcesByType) -> Result<()>;
}
