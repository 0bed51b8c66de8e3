//! hostscheduler-core — backend-neutral cluster hibernation contract.
//!
//! Defines what every cloud backend must provide to put a cluster to
//! sleep (scale all node pools to zero) and wake it again, plus the
//! process-level plumbing around it:
//!
//! - [`HostScheduler`]: `stop` / `start` / `is_hibernated` / `describe`
//! - [`BackendRegistry`]: name → factory + flag declarations
//! - [`OpContext`]: deadline and shutdown propagation for every call
//! - [`ClusterLocks`]: per-cluster serialization of mutating calls
//! - [`SchedulerConfig`]: `hostscheduler.toml`

pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use config::{SchedulerConfig, WaitConfig};
pub use context::OpContext;
pub use error::{SchedulerError, SchedulerResult};
pub use lock::{ClusterGuard, ClusterLocks};
pub use registry::{BackendRegistry, FlagSink, FlagSpec, FlagValues, Registration};
pub use scheduler::{HostScheduler, SchedulerHandle};
pub use types::*;
