//! The Kubernetes Engine calls the backend depends on.
//!
//! [`RestClusterManager`](crate::rest::RestClusterManager) implements this
//! against the real API; [`InMemoryClusterManager`](crate::memory::InMemoryClusterManager)
//! implements it in-process for tests. Mutations never block: they return
//! the provider's operation handle as soon as the request is accepted.

use async_trait::async_trait;

use hostscheduler_core::{CloudOperation, ProviderError};
use hostscheduler_state::Labels;

/// The parts of a cluster resource the scheduler reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    /// Node pool names in the provider's listing order.
    pub node_pools: Vec<String>,
    pub labels: Labels,
    /// Opaque token that must accompany a label update.
    pub label_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePoolInfo {
    pub name: String,
    /// Current nodes per zone.
    pub node_count: u32,
}

/// All paths are fully-qualified resource names from
/// [`ResourcePaths`](crate::paths::ResourcePaths).
#[async_trait]
pub trait ClusterManagerApi: Send + Sync {
    async fn get_cluster(&self, cluster_path: &str) -> Result<ClusterInfo, ProviderError>;

    async fn get_node_pool(&self, pool_path: &str) -> Result<NodePoolInfo, ProviderError>;

    async fn set_node_pool_size(
        &self,
        pool_path: &str,
        node_count: u32,
    ) -> Result<CloudOperation, ProviderError>;

    /// Replace the cluster's labels. Rejected with `Aborted` when
    /// `fingerprint` is stale.
    async fn set_resource_labels(
        &self,
        cluster_path: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> Result<CloudOperation, ProviderError>;

    async fn get_operation(&self, operation_path: &str) -> Result<CloudOperation, ProviderError>;
}
