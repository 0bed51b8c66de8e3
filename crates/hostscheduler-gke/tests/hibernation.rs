//! End-to-end hibernation flows against the in-memory cluster manager.

use std::sync::Arc;
use std::time::Duration;

use hostscheduler_core::{
    BackendRegistry, ClusterRef, ErrorCode, FlagValues, HostScheduler, LifecyclePhase, NodePoolCapacity,
    OpContext, ProviderError, SchedulerError,
};
use hostscheduler_gke::{FaultStage, GkeScheduler, InMemoryClusterManager, ResourcePaths};
use hostscheduler_state::LabelStore;
use hostscheduler_waiter::{OperationWaiter, WaitPolicy};

struct Harness {
    api: Arc<InMemoryClusterManager>,
    scheduler: GkeScheduler,
    paths: ResourcePaths,
}

impl Harness {
    fn new(pools: &[(&str, u32)]) -> Self {
        Self::with_polls(pools, 2)
    }

    fn with_polls(pools: &[(&str, u32)], polls_to_finish: u32) -> Self {
        let api = Arc::new(InMemoryClusterManager::with_polls_to_finish(polls_to_finish));
        let paths = ResourcePaths::new("test-infra", "europe-west1-b").unwrap();
        api.add_cluster(&paths.cluster("demo"), pools);
        let waiter = OperationWaiter::new(WaitPolicy::fixed(Duration::from_secs(1), 3));
        let scheduler = GkeScheduler::new(api.clone(), paths.clone(), waiter);
        Self { api, scheduler, paths }
    }

    fn cluster_path(&self) -> String {
        self.paths.cluster("demo")
    }

    fn size(&self, pool: &str) -> Option<u32> {
        self.api.pool_size(&self.cluster_path(), pool)
    }

    fn recorded(&self) -> Option<Vec<NodePoolCapacity>> {
        LabelStore::new()
            .read("demo", &self.api.labels(&self.cluster_path()))
            .unwrap()
            .map(|r| r.capacities)
    }

    fn pool_path(&self, pool: &str) -> String {
        self.paths.node_pool("demo", pool)
    }
}

fn demo() -> ClusterRef {
    ClusterRef::new("demo")
}

fn caps(pools: &[(&str, u32)]) -> Vec<NodePoolCapacity> {
    pools.iter().map(|(p, n)| NodePoolCapacity::new(*p, *n)).collect()
}

#[tokio::test(start_paused = true)]
async fn demo_cluster_round_trip() {
    let h = Harness::new(&[("default", 3)]);
    let ctx = OpContext::background();

    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    assert_eq!(h.recorded(), Some(caps(&[("default", 3)])));
    assert_eq!(h.size("default"), Some(0));
    assert!(h.scheduler.is_hibernated(&ctx, &demo()).await.unwrap());

    h.scheduler.start(&ctx, &demo()).await.unwrap();
    assert_eq!(h.size("default"), Some(3));
    assert_eq!(h.recorded(), None);
    assert!(!h.scheduler.is_hibernated(&ctx, &demo()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn round_trip_preserves_pool_order_and_foreign_labels() {
    let h = Harness::new(&[("system", 1), ("workers", 5), ("gpu", 0)]);
    h.api.set_labels(
        &h.cluster_path(),
        [("team".to_string(), "infra".to_string())].into(),
    );
    let ctx = OpContext::background();

    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    assert_eq!(
        h.recorded(),
        Some(caps(&[("system", 1), ("workers", 5), ("gpu", 0)]))
    );
    assert_eq!(h.size("workers"), Some(0));

    h.scheduler.start(&ctx, &demo()).await.unwrap();
    assert_eq!(
        h.api.pool_sizes(&h.cluster_path()),
        vec![
            ("system".to_string(), 1),
            ("workers".to_string(), 5),
            ("gpu".to_string(), 0)
        ]
    );
    let labels = h.api.labels(&h.cluster_path());
    assert_eq!(labels.len(), 1);
    assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
}

#[tokio::test(start_paused = true)]
async fn second_stop_is_benign_and_keeps_the_record() {
    let h = Harness::new(&[("default", 3)]);
    let ctx = OpContext::background();
    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    let labels = h.api.labels(&h.cluster_path());
    let mutations = h.api.mutation_requests();

    let err = h.scheduler.stop(&ctx, &demo()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyHibernated(ref c) if c == "demo"));
    assert!(err.is_benign());
    assert_eq!(h.api.labels(&h.cluster_path()), labels);
    assert_eq!(h.api.mutation_requests(), mutations);
}

#[tokio::test(start_paused = true)]
async fn start_on_active_cluster_mutates_nothing() {
    let h = Harness::new(&[("default", 3)]);
    let err = h
        .scheduler
        .start(&OpContext::background(), &demo())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotHibernated(ref c) if c == "demo"));
    assert!(err.is_benign());
    assert_eq!(h.api.mutation_requests(), 0);
    assert_eq!(h.size("default"), Some(3));
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_then_success() {
    let h = Harness::new(&[("default", 3)]);
    h.api.inject_fault(
        FaultStage::Operation,
        Some(&h.pool_path("default")),
        ProviderError::new(ErrorCode::ResourceExhausted, "zone out of resources"),
        2,
    );

    h.scheduler.stop(&OpContext::background(), &demo()).await.unwrap();
    assert_eq!(h.api.size_requests(), 3);
    assert_eq!(h.size("default"), Some(0));
    assert_eq!(h.recorded(), Some(caps(&[("default", 3)])));
}

#[tokio::test(start_paused = true)]
async fn retries_exhausted_surface_provider_error() {
    let h = Harness::new(&[("default", 3)]);
    h.api.inject_fault(
        FaultStage::Issue,
        Some(&h.pool_path("default")),
        ProviderError::new(ErrorCode::Unavailable, "try again"),
        10,
    );

    let err = h.scheduler.stop(&OpContext::background(), &demo()).await.unwrap_err();
    match err {
        SchedulerError::Provider { resource, source } => {
            assert_eq!(resource, h.pool_path("default"));
            assert_eq!(source.code, ErrorCode::Unavailable);
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(h.api.size_requests(), 3);
    // Record stays so the next stop resumes.
    assert!(h.recorded().is_some());
}

#[tokio::test(start_paused = true)]
async fn cancelled_poll_converges_on_next_call() {
    let h = Harness::with_polls(&[("default", 3)], 5);

    let ctx = OpContext::with_timeout(Duration::from_millis(2500));
    let err = h.scheduler.stop(&ctx, &demo()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DeadlineExceeded(_)));
    // The label write was accepted but not observed; nothing changed yet.
    assert_eq!(h.recorded(), None);
    assert_eq!(h.size("default"), Some(3));

    // The provider finishes the abandoned operation on its own.
    h.api.complete_pending();
    assert_eq!(h.recorded(), Some(caps(&[("default", 3)])));

    let ctx = OpContext::background();
    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    assert_eq!(h.size("default"), Some(0));
    assert_eq!(h.recorded(), Some(caps(&[("default", 3)])));

    h.scheduler.start(&ctx, &demo()).await.unwrap();
    assert_eq!(h.size("default"), Some(3));
    assert_eq!(h.recorded(), None);
}

#[tokio::test(start_paused = true)]
async fn cancelled_scale_down_resumes_on_next_stop() {
    let h = Harness::new(&[("a", 3), ("b", 2)]);

    // Record write finishes at t=2s; pool "a" is still resizing at t=3.5s.
    let ctx = OpContext::with_timeout(Duration::from_millis(3500));
    let err = h.scheduler.stop(&ctx, &demo()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DeadlineExceeded(_)));
    assert_eq!(h.recorded(), Some(caps(&[("a", 3), ("b", 2)])));
    assert_eq!(h.size("a"), Some(3));
    assert_eq!(h.size("b"), Some(2));
    let hibernated_at = h
        .scheduler
        .describe(&OpContext::background(), &demo())
        .await
        .unwrap()
        .hibernated_at;

    let ctx = OpContext::background();
    assert!(h.scheduler.is_hibernated(&ctx, &demo()).await.unwrap());
    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    assert_eq!(h.size("a"), Some(0));
    assert_eq!(h.size("b"), Some(0));
    assert_eq!(h.api.label_requests(), 1);
    let status = h.scheduler.describe(&ctx, &demo()).await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Hibernated);
    assert_eq!(status.hibernated_at, hibernated_at);

    // The abandoned resize landing late changes nothing.
    h.api.complete_pending();
    assert_eq!(h.size("a"), Some(0));

    h.scheduler.start(&ctx, &demo()).await.unwrap();
    assert_eq!(h.size("a"), Some(3));
    assert_eq!(h.size("b"), Some(2));
    assert_eq!(h.recorded(), None);
}

#[tokio::test(start_paused = true)]
async fn cancelled_scale_up_resumes_on_next_start() {
    let h = Harness::new(&[("a", 3), ("b", 2)]);
    h.scheduler.stop(&OpContext::background(), &demo()).await.unwrap();

    // Pool "a" is restored after 2s; pool "b" is still resizing at 3.5s.
    let ctx = OpContext::with_timeout(Duration::from_millis(3500));
    let err = h.scheduler.start(&ctx, &demo()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DeadlineExceeded(_)));
    assert_eq!(h.size("a"), Some(3));
    assert_eq!(h.size("b"), Some(0));
    assert_eq!(h.recorded(), Some(caps(&[("a", 3), ("b", 2)])));

    let ctx = OpContext::background();
    assert!(h.scheduler.is_hibernated(&ctx, &demo()).await.unwrap());
    let status = h.scheduler.describe(&ctx, &demo()).await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Transitioning);

    let before = h.api.size_requests();
    h.scheduler.start(&ctx, &demo()).await.unwrap();
    // Only "b" still needs a resize.
    assert_eq!(h.api.size_requests(), before + 1);
    assert_eq!(h.size("b"), Some(2));
    assert_eq!(h.recorded(), None);
    assert!(!h.scheduler.is_hibernated(&ctx, &demo()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn partial_stop_resumes_without_rewriting_record() {
    let h = Harness::new(&[("a", 3), ("b", 2)]);
    h.api.inject_fault(
        FaultStage::Issue,
        Some(&h.pool_path("b")),
        ProviderError::new(ErrorCode::PermissionDenied, "missing container.clusters.update"),
        1,
    );
    let ctx = OpContext::background();

    let err = h.scheduler.stop(&ctx, &demo()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Provider { .. }));
    assert_eq!(h.size("a"), Some(0));
    assert_eq!(h.size("b"), Some(2));

    let status = h.scheduler.describe(&ctx, &demo()).await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Transitioning);

    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    assert_eq!(h.size("b"), Some(0));
    assert_eq!(h.recorded(), Some(caps(&[("a", 3), ("b", 2)])));

    h.scheduler.start(&ctx, &demo()).await.unwrap();
    assert_eq!(h.size("a"), Some(3));
    assert_eq!(h.size("b"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn partial_start_resumes() {
    let h = Harness::new(&[("a", 3), ("b", 2)]);
    let ctx = OpContext::background();
    h.scheduler.stop(&ctx, &demo()).await.unwrap();

    h.api.inject_fault(
        FaultStage::Issue,
        Some(&h.pool_path("b")),
        ProviderError::new(ErrorCode::InvalidArgument, "bad size"),
        1,
    );
    assert!(h.scheduler.start(&ctx, &demo()).await.is_err());
    assert_eq!(h.size("a"), Some(3));
    assert!(h.recorded().is_some());

    let before = h.api.size_requests();
    h.scheduler.start(&ctx, &demo()).await.unwrap();
    // Pool "a" is already at its recorded size and is skipped.
    assert_eq!(h.api.size_requests(), before + 1);
    assert_eq!(h.size("b"), Some(2));
    assert_eq!(h.recorded(), None);
}

#[tokio::test(start_paused = true)]
async fn concurrent_stop_on_same_cluster_conflicts() {
    let h = Harness::new(&[("default", 3)]);
    let ctx = OpContext::background();
    let (a, b) = (demo(), demo());

    let (first, second) = tokio::join!(h.scheduler.stop(&ctx, &a), h.scheduler.stop(&ctx, &b));
    first.unwrap();
    assert!(matches!(second, Err(SchedulerError::Conflict { .. })));
    assert_eq!(h.size("default"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn missing_recorded_pool_is_not_found() {
    let h = Harness::new(&[("a", 3), ("b", 2)]);
    let ctx = OpContext::background();
    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    h.api.remove_pool(&h.cluster_path(), "b");

    let err = h.scheduler.start(&ctx, &demo()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { ref resource, .. } if resource.ends_with("/nodePools/b")));
    assert!(h.recorded().is_some());
}

#[tokio::test(start_paused = true)]
async fn describe_reports_phases() {
    let h = Harness::new(&[("default", 3)]);
    let ctx = OpContext::background();

    let status = h.scheduler.describe(&ctx, &demo()).await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Active);
    assert_eq!(status.pools, caps(&[("default", 3)]));
    assert_eq!(status.recorded, None);

    h.scheduler.stop(&ctx, &demo()).await.unwrap();
    let status = h.scheduler.describe(&ctx, &demo()).await.unwrap();
    assert_eq!(status.phase, LifecyclePhase::Hibernated);
    assert_eq!(status.pools, caps(&[("default", 0)]));
    assert_eq!(status.recorded, Some(caps(&[("default", 3)])));
    assert!(status.hibernated_at.is_some());
}

#[tokio::test]
async fn registry_builds_and_rejects() {
    let mut registry = BackendRegistry::new();
    hostscheduler_gke::register(&mut registry).unwrap();
    assert_eq!(registry.names(), vec!["gke"]);
    assert!(matches!(
        hostscheduler_gke::register(&mut registry),
        Err(SchedulerError::DuplicateBackend(ref n)) if n == "gke"
    ));

    let err = registry.build("aws", &FlagValues::new()).await.err().unwrap();
    assert!(matches!(err, SchedulerError::UnknownBackend(ref n) if n == "aws"));

    let err = registry
        .build("gke", &FlagValues::new().with("project", "p").with("zone", "z"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::Configuration(ref m) if m == "no gcloud keyfile is specified"));
}

#[tokio::test]
async fn malformed_key_file_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let key = dir.path().join("key.json");
    std::fs::write(&key, "not a key").unwrap();

    let mut registry = BackendRegistry::new();
    hostscheduler_gke::register(&mut registry).unwrap();
    let values = FlagValues::new()
        .with("key", key.to_string_lossy())
        .with("project", "test-infra")
        .with("zone", "europe-west1-b");
    let err = registry.build("gke", &values).await.err().unwrap();
    assert!(matches!(err, SchedulerError::Configuration(ref m) if m.contains("malformed key file")));
}
