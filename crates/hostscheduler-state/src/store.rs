//! LabelStore — hibernation records encoded into cluster resource labels.
//!
//! The store never talks to the provider. It turns a cluster's current
//! label map into a record and produces the complete label map a backend
//! should write back. The backend applies that map in one fingerprinted
//! call, so a record is either fully written or absent.

use std::collections::BTreeMap;

use tracing::debug;

use hostscheduler_core::NodePoolCapacity;

use crate::error::{StateError, StateResult};
use crate::labels::LabelKeys;
use crate::types::HibernationRecord;

/// Resource labels as the provider returns them.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct LabelStore {
    keys: LabelKeys,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store using a non-default label prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            keys: LabelKeys::new(prefix),
        }
    }

    /// Whether `labels` carry any part of a record.
    pub fn has_record(&self, labels: &Labels) -> bool {
        labels.keys().any(|k| self.keys.owns(k))
    }

    /// Decode the record for `cluster_name`, if present.
    pub fn read(&self, cluster_name: &str, labels: &Labels) -> StateResult<Option<HibernationRecord>> {
        let mut pools: Vec<(usize, NodePoolCapacity)> = Vec::new();
        for (key, value) in labels {
            if key == self.keys.timestamp() || !self.keys.owns(key) {
                continue;
            }
            let (index, pool_name) = self.keys.parse_pool(key).ok_or_else(|| StateError::Malformed {
                key: key.clone(),
                reason: "expected {prefix}-pool-{index}-{pool}".to_string(),
            })?;
            let node_count = value.parse::<u32>().map_err(|e| StateError::Malformed {
                key: key.clone(),
                reason: format!("node count {value:?}: {e}"),
            })?;
            pools.push((index, NodePoolCapacity::new(pool_name, node_count)));
        }

        let hibernated_at = match labels.get(self.keys.timestamp()) {
            Some(v) => v.parse::<u64>().map_err(|e| StateError::Malformed {
                key: self.keys.timestamp().to_string(),
                reason: format!("timestamp {v:?}: {e}"),
            })?,
            None if pools.is_empty() => return Ok(None),
            None => return Err(StateError::MissingTimestamp),
        };

        pools.sort_by_key(|(index, _)| *index);
        let capacities = pools.into_iter().map(|(_, c)| c).collect();
        Ok(Some(HibernationRecord::new(cluster_name, capacities, hibernated_at)))
    }

    /// Labels with `record` added. Fails if any record is already present;
    /// an existing record is never overwritten.
    pub fn with_record(&self, labels: &Labels, record: &HibernationRecord) -> StateResult<Labels> {
        if self.has_record(labels) {
            return Err(StateError::RecordExists(record.cluster_name.clone()));
        }
        if record.capacities.is_empty() {
            return Err(StateError::Empty);
        }

        let mut out = labels.clone();
        for (index, capacity) in record.capacities.iter().enumerate() {
            let key = self
                .keys
                .pool(index, &capacity.pool_name)
                .ok_or_else(|| StateError::InvalidPoolName(capacity.pool_name.clone()))?;
            out.insert(key, capacity.node_count.to_string());
        }
        out.insert(self.keys.timestamp().to_string(), record.hibernated_at.to_string());
        debug!(
            cluster = %record.cluster_name,
            pools = record.capacities.len(),
            "hibernation record encoded"
        );
        Ok(out)
    }

    /// Labels with every record key removed; foreign labels are kept.
    pub fn without_record(&self, labels: &Labels) -> Labels {
        labels
            .iter()
            .filter(|(k, _)| !self.keys.owns(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
