//! Per-cluster mutual exclusion.
//!
//! The hibernation record is a read-modify-write against the provider and
//! must never have two local writers. `ClusterLocks` hands out one guard
//! per fully-qualified cluster path; a second caller fails fast with
//! `Conflict` instead of queueing behind a call that may take minutes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// Guard held for the duration of one `stop`/`start` call.
#[derive(Debug)]
pub struct ClusterGuard {
    /// Locked cluster path.
    resource: String,
    _guard: OwnedMutexGuard<()>,
}

impl ClusterGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// One async mutex per cluster path, created on first use.
#[derive(Debug, Clone, Default)]
pub struct ClusterLocks {
    /// Cluster path → lock. Entries no caller holds are pruned on acquire.
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `resource` or fail with `Conflict` if another
    /// call holds it.
    pub fn try_acquire(&self, resource: &str) -> SchedulerResult<ClusterGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds so the table stays bounded.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(resource.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        match lock.try_lock_owned() {
            Ok(guard) => {
                debug!(%resource, "cluster lock acquired");
                Ok(ClusterGuard {
                    resource: resource.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => Err(SchedulerError::Conflict {
                resource: resource.to_string(),
                message: "another stop/start is in progress for this cluster".to_string(),
            }),
        }
    }

    /// Number of tracked clusters (for tests and diagnostics).
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
