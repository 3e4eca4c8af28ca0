use super::*;
use crate::cloud::{CloudControl, CloudError, CloudResult, Operation, ResourceSnapshot, SimulatedCloud};
use crate::model::{Configuration, ResourceKind};
use crate::plan;
use crate::retry::RetryConfig;
use crate::store::{MemoryStore, Mutation, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent_resources: 4,
        resource_timeout: Duration::from_secs(600),
        execution_budget: Duration::from_secs(3600),
        wait_timeout: Duration::from_secs(120),
        poll: RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        },
        cloud_retry: RetryConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
            ..Default::default()
        },
    }
}

fn compute(id: &str, current: &str, target: &str) -> RecommendationRecord {
    RecommendationRecord::new(ResourceKind::Compute, id)
        .with_current("instance_type", current)
        .with_suggested("instance_type", target)
        .with_savings("$10.00")
}

fn compute_cloud(instances: &[(&str, &str)]) -> Arc<SimulatedCloud> {
    let cloud = SimulatedCloud::new(ResourceKind::Compute);
    for (id, instance_type) in instances {
        cloud.add_resource(
            id,
            ResourceSnapshot::new("running").with("instance_type", *instance_type),
        );
    }
    Arc::new(cloud)
}

async fn setup(
    controls: CloudControls,
    config: ExecutorConfig,
    records: &[RecommendationRecord],
) -> (Executor, Arc<MemoryStore>, ExecutionPlan) {
    let store = Arc::new(MemoryStore::new());
    let plan = plan::compile(records);
    store
        .insert(Execution::new("exec-1".into(), "execute".into(), plan.clone()))
        .await
        .unwrap();
    let executor = Executor::new(store.clone(), controls, config);
    (executor, store, plan)
}

fn outcome_of(execution: &Execution, id: &str) -> ResourceOutcome {
    execution
        .per_resource_results
        .iter()
        .find(|r| r.resource_id == id)
        .map(|r| r.outcome)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_precondition_failure_does_not_block_siblings() {
    let cloud = compute_cloud(&[("i-done", "t3.medium"), ("i-big", "r5.large")]);
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud.clone());
    let records = vec![
        compute("i-done", "t3.medium", "t3.medium"),
        compute("i-big", "r5.large", "t3.medium"),
    ];
    let (executor, _, plan) = setup(controls, fast_config(), &records).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.per_resource_results.len(), plan.total_records());
    assert_eq!(
        outcome_of(&execution, "i-done"),
        ResourceOutcome::Failed(FailureReason::PreconditionNotMet)
    );
    assert_eq!(outcome_of(&execution, "i-big"), ResourceOutcome::Succeeded);
    assert!(execution.completed_at.is_some());

    // Precondition failures never reach a mutation.
    assert!(!cloud
        .calls()
        .iter()
        .any(|(op, id)| id == "i-done" && *op != Operation::Read));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_mutation_is_a_verification_mismatch() {
    let cloud = Arc::new(SimulatedCloud::new(ResourceKind::Function).with_resource(
        "fn-1",
        ResourceSnapshot::new("active").with("memory_mb", "1024"),
    ));
    cloud.drop_modifications("fn-1");
    let controls = CloudControls::new().with(ResourceKind::Function, cloud);
    let records = vec![RecommendationRecord::new(ResourceKind::Function, "fn-1")
        .with_current("memory_mb", "1024")
        .with_suggested("memory_mb", "512")];
    let (executor, _, plan) = setup(controls, fast_config(), &records).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();
    let result = &execution.per_resource_results[0];

    assert_eq!(
        result.outcome,
        ResourceOutcome::Failed(FailureReason::VerificationMismatch)
    );
    assert_eq!(result.step, Step::Verify);
    assert!(result.detail.contains("memory_mb: 1024 -> 512"));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_mutation_error_is_isolated() {
    let cloud = compute_cloud(&[("i-1", "r5.large"), ("i-2", "m5.large")]);
    cloud.fail(
        "i-1",
        Operation::Modify,
        CloudError::Permanent("InsufficientInstanceCapacity".into()),
        1,
    );
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud);
    let records = vec![
        compute("i-1", "r5.large", "t3.medium"),
        compute("i-2", "m5.large", "t3.medium"),
    ];
    let (executor, _, plan) = setup(controls, fast_config(), &records).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();

    let failed = &execution.per_resource_results[0];
    assert_eq!(failed.resource_id, "i-1");
    assert_eq!(
        failed.outcome,
        ResourceOutcome::Failed(FailureReason::MutationFailed)
    );
    assert_eq!(failed.step, Step::Modify);
    assert_eq!(outcome_of(&execution, "i-2"), ResourceOutcome::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried_within_a_step() {
    let cloud = compute_cloud(&[("i-1", "r5.large")]);
    cloud.fail(
        "i-1",
        Operation::Stop,
        CloudError::Transient("RequestLimitExceeded".into()),
        2,
    );
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud.clone());
    let (executor, _, plan) =
        setup(controls, fast_config(), &[compute("i-1", "r5.large", "t3.medium")]).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();

    assert_eq!(outcome_of(&execution, "i-1"), ResourceOutcome::Succeeded);
    let stops = cloud
        .calls()
        .iter()
        .filter(|(op, _)| *op == Operation::Stop)
        .count();
    assert_eq!(stops, 3);
}

#[tokio::test(start_paused = true)]
async fn test_wait_that_never_settles_times_out() {
    let cloud = Arc::new(
        SimulatedCloud::new(ResourceKind::Compute)
            .with_settle_reads(u32::MAX)
            .with_resource(
                "i-stuck",
                ResourceSnapshot::new("running").with("instance_type", "r5.large"),
            ),
    );
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud);
    let (executor, _, plan) = setup(
        controls,
        fast_config(),
        &[compute("i-stuck", "r5.large", "t3.medium")],
    )
    .await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();
    let result = &execution.per_resource_results[0];

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(result.outcome, ResourceOutcome::Failed(FailureReason::Timeout));
    assert_eq!(result.step, Step::WaitStopped);
}

#[tokio::test(start_paused = true)]
async fn test_execution_budget_ends_unfinished_resources() {
    let cloud = Arc::new(
        SimulatedCloud::new(ResourceKind::Compute)
            .with_settle_reads(u32::MAX)
            .with_resource(
                "i-slow",
                ResourceSnapshot::new("running").with("instance_type", "r5.large"),
            ),
    );
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud);
    let config = ExecutorConfig {
        execution_budget: Duration::from_secs(30),
        wait_timeout: Duration::from_secs(3600),
        resource_timeout: Duration::from_secs(3600),
        ..fast_config()
    };
    let (executor, _, plan) =
        setup(controls, config, &[compute("i-slow", "r5.large", "t3.medium")]).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();

    assert_eq!(
        outcome_of(&execution, "i-slow"),
        ResourceOutcome::Failed(FailureReason::Timeout)
    );
    assert!(!executor.is_running("exec-1").await);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_running_execution() {
    let cloud = Arc::new(
        SimulatedCloud::new(ResourceKind::Compute)
            .with_settle_reads(u32::MAX)
            .with_resource(
                "i-1",
                ResourceSnapshot::new("running").with("instance_type", "r5.large"),
            ),
    );
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud);
    let (executor, store, plan) =
        setup(controls, fast_config(), &[compute("i-1", "r5.large", "t3.medium")]).await;

    let runner = executor.clone();
    let handle = tokio::spawn(async move { runner.execute("exec-1", &plan).await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(executor.is_running("exec-1").await);
    assert!(executor.cancel("exec-1").await);

    let execution = handle.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(
        outcome_of(&execution, "i-1"),
        ResourceOutcome::Failed(FailureReason::Cancelled)
    );
    assert!(!executor.cancel("exec-1").await);

    let stored = store.get("exec-1").await.unwrap().unwrap();
    assert_eq!(stored.per_resource_results.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_plan_completes_immediately() {
    let (executor, _, plan) = setup(CloudControls::new(), fast_config(), &[]).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.per_resource_results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_kind_without_control_fails_precondition() {
    let records = vec![RecommendationRecord::new(ResourceKind::RelationalDB, "db-1")
        .with_current("instance_class", "db.r5.large")
        .with_suggested("instance_class", "db.t3.medium")];
    let (executor, _, plan) = setup(CloudControls::new(), fast_config(), &records).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();
    assert_eq!(
        outcome_of(&execution, "db-1"),
        ResourceOutcome::Failed(FailureReason::PreconditionNotMet)
    );
}

#[tokio::test(start_paused = true)]
async fn test_results_follow_plan_order_and_count() {
    let ids: Vec<String> = (0..6).map(|i| format!("i-{i}")).collect();
    let instances: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "r5.large")).collect();
    let cloud = compute_cloud(&instances);
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud);
    let records: Vec<_> = ids
        .iter()
        .map(|id| compute(id, "r5.large", "t3.medium"))
        .collect();
    let config = ExecutorConfig {
        max_concurrent_resources: 2,
        ..fast_config()
    };
    let (executor, _, plan) = setup(controls, config, &records).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();

    let order: Vec<&str> = execution
        .per_resource_results
        .iter()
        .map(|r| r.resource_id.as_str())
        .collect();
    assert_eq!(order, ids.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(execution.summary().succeeded, 6);
}

#[tokio::test]
async fn test_unknown_execution_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    let executor = Executor::new(store, CloudControls::new(), fast_config());
    assert!(executor.execute("missing", &plan::compile(&[])).await.is_err());
}

/// Fails the first `failing_updates` updates and delegates everything else
struct FailingStore {
    inner: MemoryStore,
    failing_updates: usize,
    updates: AtomicUsize,
}

impl FailingStore {
    fn new(failing_updates: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_updates,
            updates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExecutionStore for FailingStore {
    async fn insert(&self, execution: Execution) -> StoreResult<()> {
        self.inner.insert(execution).await
    }

    async fn get(&self, execution_id: &str) -> StoreResult<Option<Execution>> {
        self.inner.get(execution_id).await
    }

    async fn remove(&self, execution_id: &str) -> StoreResult<bool> {
        self.inner.remove(execution_id).await
    }

    async fn all(&self) -> StoreResult<Vec<Execution>> {
        self.inner.all().await
    }

    async fn update(&self, execution_id: &str, mutation: Mutation) -> StoreResult<Execution> {
        if self.updates.fetch_add(1, Ordering::SeqCst) < self.failing_updates {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.update(execution_id, mutation).await
    }
}

async fn failing_setup(failing_updates: usize) -> (Executor, Arc<FailingStore>, Arc<SimulatedCloud>, ExecutionPlan) {
    let cloud = compute_cloud(&[("i-1", "r5.large")]);
    let controls = CloudControls::new().with(ResourceKind::Compute, cloud.clone());
    let store = Arc::new(FailingStore::new(failing_updates));
    let plan = plan::compile(&[compute("i-1", "r5.large", "t3.medium")]);
    store
        .insert(Execution::new("exec-1".into(), "execute".into(), plan.clone()))
        .await
        .unwrap();
    let executor = Executor::new(store.clone(), controls, fast_config());
    (executor, store, cloud, plan)
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_store_leaves_execution_for_recovery() {
    let (executor, store, cloud, plan) = failing_setup(usize::MAX).await;

    let err = executor.execute("exec-1", &plan).await.unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));

    let stored = store.get("exec-1").await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Accepted);
    assert!(stored.completed_at.is_none());
    assert!(cloud.calls().is_empty());
    assert!(!executor.is_running("exec-1").await);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_is_recorded_when_store_recovers() {
    let (executor, store, cloud, plan) = failing_setup(1).await;

    assert!(executor.execute("exec-1", &plan).await.is_err());

    let stored = store.get("exec-1").await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(stored.error.unwrap().starts_with("executor failed to start"));
    assert!(stored.per_resource_results.is_empty());
    assert!(cloud.calls().is_empty());
}

/// Control plane client that panics when asked to modify
struct PanicOnModify {
    inner: Arc<SimulatedCloud>,
}

#[async_trait]
impl CloudControl for PanicOnModify {
    async fn read_state(&self, resource_id: &str) -> CloudResult<ResourceSnapshot> {
        self.inner.read_state(resource_id).await
    }

    async fn stop(&self, resource_id: &str) -> CloudResult<()> {
        self.inner.stop(resource_id).await
    }

    async fn start(&self, resource_id: &str) -> CloudResult<()> {
        self.inner.start(resource_id).await
    }

    async fn modify(&self, resource_id: &str, _changes: &Configuration) -> CloudResult<()> {
        panic!("client bug while modifying {resource_id}")
    }
}

#[tokio::test(start_paused = true)]
async fn test_crashed_resource_is_charged_to_its_last_phase() {
    let inner = compute_cloud(&[("i-crash", "r5.large")]);
    let controls = CloudControls::new().with(ResourceKind::Compute, Arc::new(PanicOnModify { inner }));
    let records = vec![compute("i-crash", "r5.large", "t3.medium")];
    let (executor, _, plan) = setup(controls, fast_config(), &records).await;

    let execution = executor.execute("exec-1", &plan).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.per_resource_results.len(), 1);
    let result = &execution.per_resource_results[0];
    assert_eq!(result.outcome, ResourceOutcome::Failed(FailureReason::MutationFailed));
    assert_eq!(result.step, Step::Modify);
    assert!(result.detail.contains("aborted"));
}

#[test]
fn test_aborted_results_pair_step_with_reason() {
    let record = compute("i-1", "r5.large", "t3.medium");
    let cases = [
        (ResourceState::Pending, Step::PreconditionCheck, FailureReason::PreconditionNotMet),
        (ResourceState::PreconditionCheck, Step::PreconditionCheck, FailureReason::PreconditionNotMet),
        (ResourceState::Mutating, Step::Modify, FailureReason::MutationFailed),
        (ResourceState::Verifying, Step::Verify, FailureReason::VerificationMismatch),
    ];

    for (last, step, reason) in cases {
        let result = aborted_result(&record, last, "task aborted".into());
        assert_eq!(result.step, step, "{last:?}");
        assert_eq!(result.outcome, ResourceOutcome::Failed(reason), "{last:?}");
    }

    let verified = aborted_result(&record, ResourceState::Succeeded, "task aborted".into());
    assert_eq!(verified.outcome, ResourceOutcome::Succeeded);
}
