//! The scheduler contract every backend implements.

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::SchedulerResult;
use crate::types::{ClusterRef, ClusterStatus};

/// Compute-capacity lifecycle of an existing cluster.
///
/// Implementations must be safe to call concurrently: calls on different
/// clusters run in parallel, calls on the same cluster are serialized or
/// rejected with `Conflict`. Every call converges when retried after a
/// failure, a crash, or a cancelled context.
#[async_trait]
pub trait HostScheduler: Send + Sync {
    /// Backend name, as registered.
    fn name(&self) -> &str;

    /// Hibernate a cluster: record every node pool's size, then scale all
    /// pools to zero.
    ///
    /// Fails with `NotFound` if the cluster does not exist and with
    /// `AlreadyHibernated` if it is fully hibernated. A partially
    /// hibernated cluster (record present, some pools still up) is resumed.
    async fn stop(&self, ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<()>;

    /// Wake a cluster: restore every recorded node pool size, then drop
    /// the record.
    ///
    /// Fails with `NotHibernated` (without mutating anything) if there is
    /// no record.
    async fn start(&self, ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<()>;

    /// Whether a hibernation record exists. Never reads node pool sizes.
    async fn is_hibernated(&self, ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<bool>;

    /// Live pool sizes alongside the record, if any.
    async fn describe(&self, ctx: &OpContext, cluster: &ClusterRef)
    -> SchedulerResult<ClusterStatus>;
}

/// Owned handle to the active backend.
pub type SchedulerHandle = Box<dyn HostScheduler>;
