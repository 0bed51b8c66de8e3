//! GkeScheduler — hibernation over the Kubernetes Engine API.
//!
//! ```text
//! stop   lock → get cluster → record? ─ no  → read pool sizes → write record
//!                                     └ yes → all pools at zero? → AlreadyHibernated
//!        → resize every pool above zero to 0
//!
//! start  lock → get cluster → record? ─ no → NotHibernated
//!        → resize every recorded pool not at target → remove record
//! ```
//!
//! The record is written before the first scale-down and removed after
//! the last scale-up, so an interrupted call always leaves enough state
//! for the next one to finish the job.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use hostscheduler_core::{
    CloudOperation, ClusterLocks, ClusterRef, ClusterStatus, HostScheduler, LifecyclePhase,
    NodePoolCapacity, OpContext, ProviderError, SchedulerError, SchedulerResult,
};
use hostscheduler_state::{HibernationRecord, LabelStore, Labels, StateError};
use hostscheduler_waiter::{OperationSource, OperationWaiter};

use crate::api::{ClusterInfo, ClusterManagerApi};
use crate::paths::ResourcePaths;
use crate::registration::NAME;

/// Hibernates GKE clusters in one project and zone.
pub struct GkeScheduler {
    /// Cluster Manager transport (REST, or in-memory in tests).
    api: Arc<dyn ClusterManagerApi>,
    /// Project/zone scope every cluster name is resolved in.
    paths: ResourcePaths,
    /// Polls and re-issues every mutation.
    waiter: OperationWaiter,
    /// Hibernation record codec over cluster labels.
    store: LabelStore,
    /// Per-cluster guard for `stop` and `start`.
    locks: ClusterLocks,
}

impl GkeScheduler {
    pub fn new(api: Arc<dyn ClusterManagerApi>, paths: ResourcePaths, waiter: OperationWaiter) -> Self {
        Self {
            api,
            paths,
            waiter,
            store: LabelStore::new(),
            locks: ClusterLocks::new(),
        }
    }

    async fn cluster(&self, ctx: &OpContext, cluster_path: &str) -> SchedulerResult<ClusterInfo> {
        ctx.run("reading cluster", self.api.get_cluster(cluster_path))
            .await?
            .map_err(|e| SchedulerError::from_provider(cluster_path, e))
    }

    async fn pool_size(&self, ctx: &OpContext, pool_path: &str) -> SchedulerResult<u32> {
        let pool = ctx
            .run("reading node pool", self.api.get_node_pool(pool_path))
            .await?
            .map_err(|e| SchedulerError::from_provider(pool_path, e))?;
        Ok(pool.node_count)
    }

    fn record(&self, cluster: &ClusterRef, info: &ClusterInfo) -> SchedulerResult<Option<HibernationRecord>> {
        self.store
            .read(&cluster.name, &info.labels)
            .map_err(|e| state_error(cluster, e))
    }

    /// Drive a pool resize through the waiter.
    async fn resize(
        &self,
        ctx: &OpContext,
        cluster: &ClusterRef,
        pool: &str,
        node_count: u32,
    ) -> SchedulerResult<CloudOperation> {
        let pool_path = self.paths.node_pool(&cluster.name, pool);
        info!(cluster = %cluster, %pool, node_count, "resizing node pool");
        let api = &self.api;
        let path = pool_path.as_str();
        self.waiter
            .drive(ctx, self, path, || api.set_node_pool_size(path, node_count))
            .await
    }

    /// Drive a label replacement guarded by the fingerprint of the read
    /// the new labels were computed from. A concurrent edit surfaces as
    /// `Conflict` instead of being overwritten.
    async fn write_labels(
        &self,
        ctx: &OpContext,
        cluster_path: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> SchedulerResult<CloudOperation> {
        let api = &self.api;
        self.waiter
            .drive(ctx, self, cluster_path, || {
                api.set_resource_labels(cluster_path, labels, fingerprint)
            })
            .await
    }

    /// Current size of every pool in listing order.
    async fn capacities(
        &self,
        ctx: &OpContext,
        cluster: &ClusterRef,
        info: &ClusterInfo,
    ) -> SchedulerResult<Vec<NodePoolCapacity>> {
        let mut capacities = Vec::with_capacity(info.node_pools.len());
        for pool in &info.node_pools {
            let node_count = self
                .pool_size(ctx, &self.paths.node_pool(&cluster.name, pool))
                .await?;
            capacities.push(NodePoolCapacity::new(pool.clone(), node_count));
        }
        Ok(capacities)
    }
}

#[async_trait]
impl OperationSource for GkeScheduler {
    async fn poll_operation(&self, op: &CloudOperation) -> Result<CloudOperation, ProviderError> {
        let mut polled = self.api.get_operation(&self.paths.operation(&op.id)).await?;
        if polled.target_resource.is_empty() {
            polled.target_resource = op.target_resource.clone();
        }
        Ok(polled)
    }
}

#[async_trait]
impl HostScheduler for GkeScheduler {
    fn name(&self) -> &str {
        NAME
    }

    async fn stop(&self, ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<()> {
        let cluster_path = self.paths.cluster_path(cluster)?;
        let guard = self.locks.try_acquire(&cluster_path)?;
        let info = self.cluster(ctx, &cluster_path).await?;

        let mut current = self.capacities(ctx, cluster, &info).await?;
        match self.record(cluster, &info)? {
            Some(record) => {
                // Pools created after hibernation began are not in the
                // record and are left alone.
                current.retain(|c| record.capacity_of(&c.pool_name).is_some());
                let remaining = current.iter().filter(|c| c.node_count > 0).count();
                if remaining == 0 {
                    return Err(SchedulerError::AlreadyHibernated(cluster.name.clone()));
                }
                info!(cluster = %cluster, remaining, "resuming interrupted hibernation");
            }
            None => {
                let record = HibernationRecord::new(cluster.name.clone(), current.clone(), epoch_secs());
                let labels = self
                    .store
                    .with_record(&info.labels, &record)
                    .map_err(|e| state_error(cluster, e))?;
                self.write_labels(ctx, &cluster_path, &labels, &info.label_fingerprint)
                    .await?;
                info!(
                    cluster = %cluster,
                    pools = record.capacities.len(),
                    hibernated_at = record.hibernated_at,
                    "hibernation record written"
                );
            }
        }

        for capacity in current.iter().filter(|c| c.node_count > 0) {
            self.resize(ctx, cluster, &capacity.pool_name, 0).await?;
        }
        info!(cluster = %cluster, path = guard.resource(), "cluster hibernated");
        Ok(())
    }

    async fn start(&self, ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<()> {
        let cluster_path = self.paths.cluster_path(cluster)?;
        let guard = self.locks.try_acquire(&cluster_path)?;
        let info = self.cluster(ctx, &cluster_path).await?;

        let Some(record) = self.record(cluster, &info)? else {
            return Err(SchedulerError::NotHibernated(cluster.name.clone()));
        };

        if let Some(missing) = record
            .capacities
            .iter()
            .find(|c| !info.node_pools.contains(&c.pool_name))
        {
            return Err(SchedulerError::NotFound {
                resource: self.paths.node_pool(&cluster.name, &missing.pool_name),
                message: "recorded node pool no longer exists".to_string(),
            });
        }

        for capacity in &record.capacities {
            let pool_path = self.paths.node_pool(&cluster.name, &capacity.pool_name);
            let size = self.pool_size(ctx, &pool_path).await?;
            if size == capacity.node_count {
                debug!(cluster = %cluster, pool = %capacity.pool_name, size, "node pool already at recorded size");
                continue;
            }
            self.resize(ctx, cluster, &capacity.pool_name, capacity.node_count)
                .await?;
        }

        // Re-read so foreign label edits made while scaling are kept.
        let info = self.cluster(ctx, &cluster_path).await?;
        let labels = self.store.without_record(&info.labels);
        self.write_labels(ctx, &cluster_path, &labels, &info.label_fingerprint)
            .await?;
        info!(
            cluster = %cluster,
            path = guard.resource(),
            pools = record.capacities.len(),
            "cluster restored"
        );
        Ok(())
    }

    async fn is_hibernated(&self, ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<bool> {
        let info = self.cluster(ctx, &self.paths.cluster_path(cluster)?).await?;
        Ok(self.store.has_record(&info.labels))
    }

    async fn describe(&self, ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<ClusterStatus> {
        let info = self.cluster(ctx, &self.paths.cluster_path(cluster)?).await?;
        let pools = self.capacities(ctx, cluster, &info).await?;
        let record = self.record(cluster, &info)?;

        let phase = match &record {
            None => LifecyclePhase::Active,
            Some(record) => {
                let asleep = record.capacities.iter().all(|recorded| {
                    pools
                        .iter()
                        .find(|p| p.pool_name == recorded.pool_name)
                        .is_none_or(|p| p.node_count == 0)
                });
                if asleep {
                    LifecyclePhase::Hibernated
                } else {
                    LifecyclePhase::Transitioning
                }
            }
        };
        if phase == LifecyclePhase::Transitioning {
            warn!(cluster = %cluster, "cluster is part-way through a hibernation transition");
        }

        Ok(ClusterStatus {
            cluster: cluster.name.clone(),
            phase,
            pools,
            hibernated_at: record.as_ref().map(|r| r.hibernated_at),
            recorded: record.map(|r| r.capacities),
        })
    }
}

fn state_error(cluster: &ClusterRef, err: StateError) -> SchedulerError {
    SchedulerError::State {
        cluster: cluster.name.clone(),
        message: err.to_string(),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
