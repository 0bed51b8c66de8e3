//! hostscheduler-gke — Google Kubernetes Engine backend.
//!
//! Hibernates a GKE cluster by scaling every node pool to zero and wakes
//! it by restoring the recorded sizes. The record lives on the cluster's
//! resource labels (see `hostscheduler-state`).
//!
//! # Architecture
//!
//! ```text
//! GkeScheduler (HostScheduler)
//!   ├── ResourcePaths          project/zone → resource names
//!   ├── ClusterLocks           one stop/start per cluster
//!   ├── LabelStore             record ⇄ labels
//!   ├── OperationWaiter        poll + re-issue
//!   └── Arc<dyn ClusterManagerApi>
//!         ├── RestClusterManager       container.googleapis.com/v1
//!         │     └── ServiceAccountTokenSource (RS256 JWT → OAuth2 token)
//!         └── InMemoryClusterManager   in-process, for tests
//! ```

pub mod api;
pub mod auth;
pub mod memory;
pub mod paths;
pub mod registration;
pub mod rest;
pub mod scheduler;

pub use api::{ClusterInfo, ClusterManagerApi, NodePoolInfo};
pub use auth::{AuthError, ServiceAccountKey, ServiceAccountTokenSource, TokenSource};
pub use memory::{FaultStage, InMemoryClusterManager};
pub use paths::ResourcePaths;
pub use registration::{GkeSettings, NAME, build, declare_flags, register};
pub use rest::RestClusterManager;
pub use scheduler::GkeScheduler;
