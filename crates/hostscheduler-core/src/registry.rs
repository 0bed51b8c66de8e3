//! Backend registry.
//!
//! Each backend contributes a [`Registration`]: a name, an async factory,
//! and a flag declarer. The hosting process owns one [`BackendRegistry`],
//! asks it to declare every backend's flags on its command line, and
//! builds exactly one backend from the parsed values.
//!
//! ```text
//! main
//!   ├── BackendRegistry::new()
//!   ├── hostscheduler_gke::register(&mut registry)?
//!   ├── registry.declare_flags(&mut cli)
//!   └── registry.build("gke", &values).await? -> SchedulerHandle
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::SchedulerHandle;

/// Boxed future returned by backend factories.
pub type BuildFuture = Pin<Box<dyn Future<Output = SchedulerResult<SchedulerHandle>> + Send>>;

/// Builds a backend from parsed flag values. May perform network I/O.
pub type Factory = Arc<dyn Fn(FlagValues) -> BuildFuture + Send + Sync>;

/// Declares a backend's flags on the hosting process's flag sink.
pub type DeclareFlagsFn = fn(&mut dyn FlagSink);

/// A single configuration flag a backend accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSpec {
    /// Owning backend.
    pub backend: String,
    /// Flag name without leading dashes (`project`).
    pub name: String,
    pub help: String,
}

/// Receives flag declarations, typically the CLI builder.
pub trait FlagSink {
    fn declare(&mut self, flag: FlagSpec);
}

impl FlagSink for Vec<FlagSpec> {
    fn declare(&mut self, flag: FlagSpec) {
        self.push(flag);
    }
}

/// Parsed flag values handed to a factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagValues {
    values: HashMap<String, String>,
}

impl FlagValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Value of `name`; empty strings count as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value of a required flag, or a `Configuration` error naming it.
    pub fn require(&self, name: &str) -> SchedulerResult<&str> {
        self.get(name)
            .ok_or_else(|| SchedulerError::Configuration(format!("no {name} is specified")))
    }

    /// Overlay `other` on top of `self`; set values in `other` win.
    pub fn merge(&mut self, other: &FlagValues) {
        for (k, v) in &other.values {
            if !v.is_empty() {
                self.values.insert(k.clone(), v.clone());
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlagValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = FlagValues::new();
        for (k, v) in iter {
            values.set(k, v);
        }
        values
    }
}

/// Everything a backend contributes to the registry.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub build: Factory,
    pub declare_flags: DeclareFlagsFn,
}

impl Registration {
    pub fn new<F, Fut>(name: impl Into<String>, declare_flags: DeclareFlagsFn, build: F) -> Self
    where
        F: Fn(FlagValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SchedulerResult<SchedulerHandle>> + Send + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(move |values| Box::pin(build(values))),
            declare_flags,
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Name → registration table owned by the process entry point.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    entries: BTreeMap<String, Registration>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. A second registration under the same name is a
    /// packaging error and is rejected.
    pub fn register(&mut self, registration: Registration) -> SchedulerResult<()> {
        if self.entries.contains_key(&registration.name) {
            return Err(SchedulerError::DuplicateBackend(registration.name));
        }
        debug!(backend = %registration.name, "backend registered");
        self.entries.insert(registration.name.clone(), registration);
        Ok(())
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Let every backend declare its flags.
    pub fn declare_flags(&self, sink: &mut dyn FlagSink) {
        for registration in self.entries.values() {
            (registration.declare_flags)(sink);
        }
    }

    /// Flags declared by a single backend.
    pub fn flags_for(&self, name: &str) -> SchedulerResult<Vec<FlagSpec>> {
        let registration = self
            .entries
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownBackend(name.to_string()))?;
        let mut flags = Vec::new();
        (registration.declare_flags)(&mut flags);
        Ok(flags)
    }

    /// Construct the named backend from parsed flag values.
    pub async fn build(&self, name: &str, values: &FlagValues) -> SchedulerResult<SchedulerHandle> {
        let registration = self
            .entries
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownBackend(name.to_string()))?;
        let handle = (registration.build)(values.clone()).await?;
        info!(backend = %name, "backend initialized");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OpContext;
    use crate::scheduler::HostScheduler;
    use crate::types::{ClusterRef, ClusterStatus, LifecyclePhase};
    use async_trait::async_trait;

    struct NoopScheduler;

    #[async_trait]
    impl HostScheduler for NoopScheduler {
        fn name(&self) -> &str {
            "noop"
        }

        async fn stop(&self, _ctx: &OpContext, _cluster: &ClusterRef) -> SchedulerResult<()> {
            Ok(())
        }

        async fn start(&self, _ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<()> {
            Err(SchedulerError::NotHibernated(cluster.name.clone()))
        }

        async fn is_hibernated(&self, _ctx: &OpContext, _cluster: &ClusterRef) -> SchedulerResult<bool> {
            Ok(false)
        }

        async fn describe(&self, _ctx: &OpContext, cluster: &ClusterRef) -> SchedulerResult<ClusterStatus> {
            Ok(ClusterStatus {
                cluster: cluster.name.clone(),
                phase: LifecyclePhase::Active,
                pools: Vec::new(),
                recorded: None,
                hibernated_at: None,
            })
        }
    }

    fn noop_flags(sink: &mut dyn FlagSink) {
        sink.declare(FlagSpec {
            backend: "noop".into(),
            name: "region".into(),
            help: "region to operate in".into(),
        });
    }

    fn noop_registration() -> Registration {
        Registration::new("noop", noop_flags, |values: FlagValues| async move {
            values.require("region")?;
            Ok::<SchedulerHandle, SchedulerError>(Box::new(NoopScheduler))
        })
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(noop_registration()).unwrap();
        let err = registry.register(noop_registration()).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateBackend(ref n) if n == "noop"));
        assert_eq!(registry.names(), vec!["noop"]);
    }

    #[tokio::test]
    async fn unknown_backend_fails_build() {
        let registry = BackendRegistry::new();
        let result = registry.build("aws", &FlagValues::new()).await;
        assert!(matches!(result, Err(SchedulerError::UnknownBackend(ref n)) if n == "aws"));
    }

    #[tokio::test]
    async fn build_delegates_to_factory() {
        let mut registry = BackendRegistry::new();
        registry.register(noop_registration()).unwrap();

        let missing = registry.build("noop", &FlagValues::new()).await;
        assert!(matches!(missing, Err(SchedulerError::Configuration(ref m)) if m == "no region is specified"));

        let values = FlagValues::new().with("region", "eu");
        let handle = registry.build("noop", &values).await.unwrap();
        assert_eq!(handle.name(), "noop");
    }

    #[test]
    fn flags_are_declared_per_backend() {
        let mut registry = BackendRegistry::new();
        registry.register(noop_registration()).unwrap();

        let mut sink: Vec<FlagSpec> = Vec::new();
        registry.declare_flags(&mut sink);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].name, "region");

        assert_eq!(registry.flags_for("noop").unwrap(), sink);
        assert!(registry.flags_for("missing").is_err());
    }

    #[test]
    fn flag_values_treat_empty_as_unset_and_merge() {
        let mut base: FlagValues = [("project", "from-file"), ("zone", "")].into_iter().collect();
        assert_eq!(base.get("zone"), None);

        let overrides = FlagValues::new().with("project", "from-cli").with("zone", "");
        base.merge(&overrides);
        assert_eq!(base.get("project"), Some("from-cli"));
        assert!(base.require("zone").is_err());
    }
}
