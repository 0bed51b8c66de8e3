//! Kubernetes Engine resource names.
//!
//! Pure string composition from `{project, zone, cluster, pool}`; no
//! network calls. Every composed path can be split back into its parts.

use hostscheduler_core::{ClusterRef, SchedulerError, SchedulerResult};

/// A single path segment: non-empty, no `/`, no whitespace.
fn check_segment(what: &str, value: &str) -> SchedulerResult<()> {
    if value.is_empty() {
        return Err(SchedulerError::Configuration(format!("no {what} is specified")));
    }
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(SchedulerError::Configuration(format!("invalid {what}: {value:?}")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePaths {
    project: String,
    zone: String,
}

impl ResourcePaths {
    /// Validate and capture the project/zone scope.
    pub fn new(project: &str, zone: &str) -> SchedulerResult<Self> {
        check_segment("project", project)?;
        check_segment("zone", zone)?;
        Ok(Self {
            project: project.to_string(),
            zone: zone.to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// `projects/{project}/locations/{zone}`
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.zone)
    }

    /// `projects/{project}/locations/{zone}/clusters/{name}`
    pub fn cluster(&self, name: &str) -> String {
        format!("{}/clusters/{}", self.parent(), name)
    }

    /// Path of a caller-supplied cluster. The name must be a single
    /// segment so the path splits back to it.
    pub fn cluster_path(&self, cluster: &ClusterRef) -> SchedulerResult<String> {
        check_segment("cluster", &cluster.name)?;
        Ok(self.cluster(&cluster.name))
    }

    /// `…/clusters/{cluster}/nodePools/{pool}`
    pub fn node_pool(&self, cluster: &str, pool: &str) -> String {
        format!("{}/nodePools/{}", self.cluster(cluster), pool)
    }

    /// `projects/{project}/locations/{zone}/operations/{id}`
    pub fn operation(&self, id: &str) -> String {
        format!("{}/operations/{}", self.parent(), id)
    }

    /// Cluster name from a cluster path in this scope.
    pub fn cluster_name<'a>(&self, path: &'a str) -> Option<&'a str> {
        let name = path.strip_prefix(&self.parent())?.strip_prefix("/clusters/")?;
        (!name.is_empty() && !name.contains('/')).then_some(name)
    }
}

/// Split a node pool path into `(cluster_path, pool_name)`.
pub fn split_node_pool(path: &str) -> Option<(&str, &str)> {
    let (cluster, pool) = path.rsplit_once("/nodePools/")?;
    (!pool.is_empty() && !pool.contains('/') && cluster.contains("/clusters/")).then_some((cluster, pool))
}

/// Split an operation path into `(parent, operation_id)`.
pub fn split_operation(path: &str) -> Option<(&str, &str)> {
    let (parent, id) = path.rsplit_once("/operations/")?;
    (!id.is_empty() && !id.contains('/')).then_some((parent, id))
}
