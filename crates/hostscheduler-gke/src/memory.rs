//! InMemoryClusterManager — an in-process Kubernetes Engine.
//!
//! Models what the scheduler relies on: clusters with ordered node
//! pools, fingerprinted labels, and asynchronous operations whose effect
//! lands only when they finish. Operations advance one step per status
//! poll (`Pending → Running → Done`), or all at once via
//! [`complete_pending`](InMemoryClusterManager::complete_pending) to
//! simulate the provider finishing work nobody is watching.
//!
//! Faults can be injected per mutation, either when the request is issued
//! or as the operation's terminal error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use hostscheduler_core::{CloudOperation, ErrorCode, OperationStatus, ProviderError};
use hostscheduler_state::Labels;

use crate::api::{ClusterInfo, ClusterManagerApi, NodePoolInfo};
use crate::paths::{split_node_pool, split_operation};

/// Where an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    /// The mutation request itself is rejected.
    Issue,
    /// The request is accepted; its operation ends in `Error`.
    Operation,
}

#[derive(Debug, Clone)]
struct Fault {
    stage: FaultStage,
    /// Exact resource path, or any mutation when `None`.
    target: Option<String>,
    error: ProviderError,
    remaining: u32,
}

#[derive(Debug, Clone)]
struct FakeCluster {
    name: String,
    pools: Vec<(String, u32)>,
    labels: Labels,
    generation: u64,
}

impl FakeCluster {
    fn fingerprint(&self) -> String {
        format!("{:016x}", self.generation)
    }
}

#[derive(Debug, Clone)]
enum Effect {
    SetSize { cluster: String, pool: String, count: u32 },
    SetLabels { cluster: String, labels: Labels },
}

#[derive(Debug, Clone)]
struct FakeOperation {
    op: CloudOperation,
    polls_left: u32,
    effect: Option<Effect>,
    failure: Option<ProviderError>,
}

#[derive(Debug, Default)]
struct Inner {
    clusters: BTreeMap<String, FakeCluster>,
    operations: HashMap<String, FakeOperation>,
    faults: Vec<Fault>,
    next_operation: u64,
    size_requests: u32,
    label_requests: u32,
    polls: u32,
}

impl Inner {
    fn take_fault(&mut self, stage: FaultStage, target: &str) -> Option<ProviderError> {
        let idx = self.faults.iter().position(|f| {
            f.stage == stage && f.remaining > 0 && f.target.as_deref().is_none_or(|t| t == target)
        })?;
        let fault = &mut self.faults[idx];
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            self.faults.remove(idx);
        }
        Some(error)
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::SetSize { cluster, pool, count } => {
                if let Some(c) = self.clusters.get_mut(&cluster) {
                    if let Some(p) = c.pools.iter_mut().find(|(name, _)| *name == pool) {
                        p.1 = count;
                    }
                }
            }
            Effect::SetLabels { cluster, labels } => {
                if let Some(c) = self.clusters.get_mut(&cluster) {
                    c.labels = labels;
                    c.generation += 1;
                }
            }
        }
    }

    /// Advance an operation by one step, applying its effect on completion.
    fn advance(&mut self, id: &str) {
        let Some(fake) = self.operations.get_mut(id) else {
            return;
        };
        if fake.op.status.is_terminal() {
            return;
        }
        if fake.polls_left > 1 {
            fake.polls_left -= 1;
            fake.op.status = OperationStatus::Running;
            return;
        }
        fake.polls_left = 0;
        match fake.failure.take() {
            Some(error) => {
                fake.op.status = OperationStatus::Error;
                fake.op.error = Some(error);
                fake.effect = None;
            }
            None => {
                fake.op.status = OperationStatus::Done;
                if let Some(effect) = fake.effect.take() {
                    self.apply(effect);
                }
            }
        }
    }
}

pub struct InMemoryClusterManager {
    inner: Mutex<Inner>,
    /// Polls an operation needs before it finishes.
    polls_to_finish: u32,
}

impl Default for InMemoryClusterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClusterManager {
    pub fn new() -> Self {
        Self::with_polls_to_finish(2)
    }

    pub fn with_polls_to_finish(polls: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            polls_to_finish: polls.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create (or replace) a cluster at `cluster_path`.
    pub fn add_cluster(&self, cluster_path: &str, pools: &[(&str, u32)]) {
        let name = cluster_path
            .rsplit_once("/clusters/")
            .map(|(_, n)| n)
            .unwrap_or(cluster_path)
            .to_string();
        let cluster = FakeCluster {
            name,
            pools: pools.iter().map(|(p, n)| (p.to_string(), *n)).collect(),
            labels: Labels::new(),
            generation: 1,
        };
        self.lock().clusters.insert(cluster_path.to_string(), cluster);
    }

    /// Set labels directly, bypassing operations (another actor's edit).
    pub fn set_labels(&self, cluster_path: &str, labels: Labels) {
        let mut inner = self.lock();
        if let Some(c) = inner.clusters.get_mut(cluster_path) {
            c.labels = labels;
            c.generation += 1;
        }
    }

    /// Remove a node pool directly.
    pub fn remove_pool(&self, cluster_path: &str, pool: &str) {
        let mut inner = self.lock();
        if let Some(c) = inner.clusters.get_mut(cluster_path) {
            c.pools.retain(|(name, _)| name != pool);
        }
    }

    pub fn pool_size(&self, cluster_path: &str, pool: &str) -> Option<u32> {
        let inner = self.lock();
        let cluster = inner.clusters.get(cluster_path)?;
        cluster.pools.iter().find(|(p, _)| p == pool).map(|(_, n)| *n)
    }

    pub fn pool_sizes(&self, cluster_path: &str) -> Vec<(String, u32)> {
        self.lock()
            .clusters
            .get(cluster_path)
            .map(|c| c.pools.clone())
            .unwrap_or_default()
    }

    pub fn labels(&self, cluster_path: &str) -> Labels {
        self.lock()
            .clusters
            .get(cluster_path)
            .map(|c| c.labels.clone())
            .unwrap_or_default()
    }

    /// Inject a fault for the next `times` matching mutations.
    pub fn inject_fault(&self, stage: FaultStage, target: Option<&str>, error: ProviderError, times: u32) {
        self.lock().faults.push(Fault {
            stage,
            target: target.map(str::to_string),
            error,
            remaining: times,
        });
    }

    /// Finish every outstanding operation, as the provider would.
    pub fn complete_pending(&self) {
        let mut inner = self.lock();
        let ids: Vec<String> = inner
            .operations
            .iter()
            .filter(|(_, o)| !o.op.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            while inner.operations.get(&id).is_some_and(|o| !o.op.status.is_terminal()) {
                inner.advance(&id);
            }
        }
    }

    /// Node pool resize requests received (accepted or not).
    pub fn size_requests(&self) -> u32 {
        self.lock().size_requests
    }

    /// Label update requests received (accepted or not).
    pub fn label_requests(&self) -> u32 {
        self.lock().label_requests
    }

    /// Total mutation requests received.
    pub fn mutation_requests(&self) -> u32 {
        let inner = self.lock();
        inner.size_requests + inner.label_requests
    }

    pub fn operation_polls(&self) -> u32 {
        self.lock().polls
    }

    fn start_operation(&self, inner: &mut Inner, target: &str, effect: Effect) -> CloudOperation {
        inner.next_operation += 1;
        let id = format!("operation-{}", inner.next_operation);
        let op = CloudOperation::new(id.clone(), target);
        let failure = inner.take_fault(FaultStage::Operation, target);
        inner.operations.insert(
            id.clone(),
            FakeOperation {
                op: op.clone(),
                polls_left: self.polls_to_finish,
                effect: Some(effect),
                failure,
            },
        );
        debug!(operation = %id, %target, "operation started");
        op
    }
}

fn not_found(what: &str, path: &str) -> ProviderError {
    ProviderError::new(ErrorCode::NotFound, format!("{what} {path} not found"))
}

#[async_trait]
impl ClusterManagerApi for InMemoryClusterManager {
    async fn get_cluster(&self, cluster_path: &str) -> Result<ClusterInfo, ProviderError> {
        let inner = self.lock();
        let cluster = inner
            .clusters
            .get(cluster_path)
            .ok_or_else(|| not_found("cluster", cluster_path))?;
        Ok(ClusterInfo {
            name: cluster.name.clone(),
            node_pools: cluster.pools.iter().map(|(p, _)| p.clone()).collect(),
            labels: cluster.labels.clone(),
            label_fingerprint: cluster.fingerprint(),
        })
    }

    async fn get_node_pool(&self, pool_path: &str) -> Result<NodePoolInfo, ProviderError> {
        let (cluster_path, pool) = split_node_pool(pool_path)
            .ok_or_else(|| ProviderError::new(ErrorCode::InvalidArgument, format!("bad node pool name {pool_path}")))?;
        let inner = self.lock();
        let node_count = inner
            .clusters
            .get(cluster_path)
            .and_then(|c| c.pools.iter().find(|(p, _)| p == pool))
            .map(|(_, n)| *n)
            .ok_or_else(|| not_found("node pool", pool_path))?;
        Ok(NodePoolInfo {
            name: pool.to_string(),
            node_count,
        })
    }

    async fn set_node_pool_size(
        &self,
        pool_path: &str,
        node_count: u32,
    ) -> Result<CloudOperation, ProviderError> {
        let (cluster_path, pool) = split_node_pool(pool_path)
            .ok_or_else(|| ProviderError::new(ErrorCode::InvalidArgument, format!("bad node pool name {pool_path}")))?;
        let mut inner = self.lock();
        inner.size_requests += 1;
        if let Some(error) = inner.take_fault(FaultStage::Issue, pool_path) {
            return Err(error);
        }
        let exists = inner
            .clusters
            .get(cluster_path)
            .is_some_and(|c| c.pools.iter().any(|(p, _)| p == pool));
        if !exists {
            return Err(not_found("node pool", pool_path));
        }
        let effect = Effect::SetSize {
            cluster: cluster_path.to_string(),
            pool: pool.to_string(),
            count: node_count,
        };
        Ok(self.start_operation(&mut inner, pool_path, effect))
    }

    async fn set_resource_labels(
        &self,
        cluster_path: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> Result<CloudOperation, ProviderError> {
        let mut inner = self.lock();
        inner.label_requests += 1;
        if let Some(error) = inner.take_fault(FaultStage::Issue, cluster_path) {
            return Err(error);
        }
        let cluster = inner
            .clusters
            .get(cluster_path)
            .ok_or_else(|| not_found("cluster", cluster_path))?;
        if cluster.fingerprint() != fingerprint {
            return Err(ProviderError::new(
                ErrorCode::Aborted,
                format!("labels fingerprint {fingerprint} is stale for {cluster_path}"),
            ));
        }
        let effect = Effect::SetLabels {
            cluster: cluster_path.to_string(),
            labels: labels.clone(),
        };
        Ok(self.start_operation(&mut inner, cluster_path, effect))
    }

    async fn get_operation(&self, operation_path: &str) -> Result<CloudOperation, ProviderError> {
        let (_, id) = split_operation(operation_path)
            .ok_or_else(|| ProviderError::new(ErrorCode::InvalidArgument, format!("bad operation name {operation_path}")))?;
        let mut inner = self.lock();
        inner.polls += 1;
        inner.advance(id);
        inner
            .operations
            .get(id)
            .map(|o| o.op.clone())
            .ok_or_else(|| not_found("operation", operation_path))
    }
}
