//! Registry entry for the GKE backend.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use hostscheduler_core::{
    BackendRegistry, FlagSink, FlagSpec, FlagValues, Registration, SchedulerError, SchedulerHandle,
    SchedulerResult, WaitConfig,
};
use hostscheduler_waiter::{OperationWaiter, WaitPolicy};

use crate::auth::{ServiceAccountTokenSource, TokenSource};
use crate::paths::ResourcePaths;
use crate::rest::RestClusterManager;
use crate::scheduler::GkeScheduler;

pub const NAME: &str = "gke";

pub const FLAG_KEY: &str = "key";
pub const FLAG_PROJECT: &str = "project";
pub const FLAG_ZONE: &str = "zone";

const FLAGS: &[(&str, &str)] = &[
    (FLAG_KEY, "Path to the gcloud service account key file"),
    (FLAG_PROJECT, "gcp project name"),
    (FLAG_ZONE, "gcp zone name"),
    (WaitConfig::INITIAL_INTERVAL, "First delay between operation polls (e.g. 1s)"),
    (WaitConfig::MAX_INTERVAL, "Longest delay between operation polls (e.g. 30s)"),
    (WaitConfig::MULTIPLIER, "Growth factor of the poll delay"),
    (WaitConfig::MAX_ATTEMPTS, "Attempts per mutation before giving up"),
];

pub fn declare_flags(sink: &mut dyn FlagSink) {
    for (name, help) in FLAGS {
        sink.declare(FlagSpec {
            backend: NAME.to_string(),
            name: name.to_string(),
            help: help.to_string(),
        });
    }
}

/// Add the GKE backend to `registry`.
pub fn register(registry: &mut BackendRegistry) -> SchedulerResult<()> {
    registry.register(Registration::new(NAME, declare_flags, build))
}

/// Flags checked before any I/O.
#[derive(Debug, Clone)]
pub struct GkeSettings {
    pub key: String,
    pub paths: ResourcePaths,
    pub policy: WaitPolicy,
}

impl GkeSettings {
    pub fn from_flags(values: &FlagValues) -> SchedulerResult<Self> {
        let key = values
            .get(FLAG_KEY)
            .ok_or_else(|| SchedulerError::Configuration("no gcloud keyfile is specified".to_string()))?
            .to_string();
        let paths = ResourcePaths::new(values.require(FLAG_PROJECT)?, values.require(FLAG_ZONE)?)?;
        let wait = WaitConfig::from_flags(values).map_err(SchedulerError::Configuration)?;
        Ok(Self {
            key,
            paths,
            policy: WaitPolicy::from_config(&wait),
        })
    }
}

/// Validate flags, load credentials, and confirm them with one token
/// exchange.
pub async fn build(values: FlagValues) -> SchedulerResult<SchedulerHandle> {
    let settings = GkeSettings::from_flags(&values)?;

    let http = RestClusterManager::http_client()
        .map_err(|e| SchedulerError::Configuration(format!("cannot build http client: {e}")))?;
    let tokens = ServiceAccountTokenSource::from_file(Path::new(&settings.key), http.clone())?;
    tokens.token().await?;
    info!(
        client_email = %tokens.client_email(),
        project = %settings.paths.project(),
        zone = %settings.paths.zone(),
        "gke credentials accepted"
    );

    let api = RestClusterManager::new(http, Arc::new(tokens));
    let scheduler = GkeScheduler::new(Arc::new(api), settings.paths, OperationWaiter::new(settings.policy));
    Ok(Box::new(scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn complete() -> FlagValues {
        FlagValues::new()
            .with(FLAG_KEY, "/nonexistent/key.json")
            .with(FLAG_PROJECT, "test-infra")
            .with(FLAG_ZONE, "europe-west1-b")
    }

    #[test]
    fn declares_backend_flags() {
        let mut flags: Vec<FlagSpec> = Vec::new();
        declare_flags(&mut flags);
        let names: Vec<&str> = flags.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(&names[..3], &["key", "project", "zone"]);
        assert!(flags.iter().all(|f| f.backend == NAME));
    }

    #[test]
    fn settings_require_every_flag() {
        for (missing, expected) in [
            (FLAG_KEY, "no gcloud keyfile is specified"),
            (FLAG_PROJECT, "no project is specified"),
            (FLAG_ZONE, "no zone is specified"),
        ] {
            let values = complete().with(missing, "");
            match GkeSettings::from_flags(&values) {
                Err(SchedulerError::Configuration(msg)) => assert_eq!(msg, expected),
                other => panic!("expected configuration error, got {other:?}"),
            }
        }
    }

    #[test]
    fn settings_carry_wait_policy() {
        let values = complete()
            .with(WaitConfig::INITIAL_INTERVAL, "2s")
            .with(WaitConfig::MAX_ATTEMPTS, "7");
        let settings = GkeSettings::from_flags(&values).unwrap();
        assert_eq!(settings.policy.initial_interval, Duration::from_secs(2));
        assert_eq!(settings.policy.max_attempts, 7);
        assert_eq!(settings.policy.max_interval, WaitPolicy::default().max_interval);

        for (name, value) in [
            (WaitConfig::MULTIPLIER, "fast"),
            (WaitConfig::MAX_INTERVAL, "18446744073709551615s"),
            (WaitConfig::INITIAL_INTERVAL, "307445734561825862m"),
        ] {
            let bad = complete().with(name, value);
            assert!(matches!(
                GkeSettings::from_flags(&bad),
                Err(SchedulerError::Configuration(_))
            ));
        }
    }

    #[tokio::test]
    async fn unreadable_key_is_configuration_error() {
        let err = build(complete()).await.err().unwrap();
        assert!(matches!(err, SchedulerError::Configuration(ref m) if m.contains("key file")));
    }
}
