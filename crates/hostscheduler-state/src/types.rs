//! The persisted hibernation record.

use serde::{Deserialize, Serialize};

use hostscheduler_core::NodePoolCapacity;

/// Pre-hibernation capacity of a cluster.
///
/// Present if and only if the cluster is hibernated (or partway into or
/// out of hibernation). Always describes every pool that existed when it
/// was written, in the provider's listing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HibernationRecord {
    pub cluster_name: String,
    pub capacities: Vec<NodePoolCapacity>,
    /// Unix timestamp (seconds) when the record was written.
    pub hibernated_at: u64,
}

impl HibernationRecord {
    pub fn new(cluster_name: impl Into<String>, capacities: Vec<NodePoolCapacity>, hibernated_at: u64) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            capacities,
            hibernated_at,
        }
    }

    /// Recorded size of `pool`, if it was part of the record.
    pub fn capacity_of(&self, pool: &str) -> Option<u32> {
        self.capacities
            .iter()
            .find(|c| c.pool_name == pool)
            .map(|c| c.node_count)
    }
}
