//! Shared fixtures for end-to-end dispatch tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use costguard::cloud::{CloudControls, ResourceSnapshot, SimulatedCloud};
use costguard::config::ExecutorConfig;
use costguard::dispatch::{spawn_worker, ChannelQueue, Dispatcher};
use costguard::executor::Executor;
use costguard::model::{Execution, RecommendationRecord, ResourceKind};
use costguard::policy::{PolicyEngine, PolicyTable};
use costguard::retry::RetryConfig;
use costguard::store::{ExecutionStore, MemoryStore};

/// Executor settings that settle in milliseconds of real time
pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent_resources: 4,
        resource_timeout: Duration::from_secs(10),
        execution_budget: Duration::from_secs(30),
        wait_timeout: Duration::from_secs(5),
        poll: RetryConfig {
            attempts: u32::MAX,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        },
        cloud_retry: RetryConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..Default::default()
        },
    }
}

pub fn fast_handoff() -> RetryConfig {
    RetryConfig {
        attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        ..Default::default()
    }
}

pub fn compute(id: &str, current: &str, target: &str, savings: &str) -> RecommendationRecord {
    RecommendationRecord::new(ResourceKind::Compute, id)
        .with_current("instance_type", current)
        .with_suggested("instance_type", target)
        .with_savings(savings)
}

/// Builder for a dispatcher wired to a running worker over simulated clouds
pub struct HarnessBuilder {
    clouds: HashMap<ResourceKind, Arc<SimulatedCloud>>,
    executor: ExecutorConfig,
    queue_capacity: usize,
    max_concurrent_executions: usize,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let clouds = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(SimulatedCloud::new(*kind))))
            .collect();
        Self {
            clouds,
            executor: fast_executor_config(),
            queue_capacity: 16,
            max_concurrent_executions: 2,
        }
    }

    pub fn with_resource(self, kind: ResourceKind, id: &str, snapshot: ResourceSnapshot) -> Self {
        self.clouds[&kind].add_resource(id, snapshot);
        self
    }

    pub fn with_compute(self, id: &str, instance_type: &str) -> Self {
        self.with_resource(
            ResourceKind::Compute,
            id,
            ResourceSnapshot::new("running").with("instance_type", instance_type),
        )
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let controls = self
            .clouds
            .iter()
            .fold(CloudControls::new(), |controls, (kind, cloud)| {
                controls.with(*kind, cloud.clone())
            });

        let executor = Executor::new(store.clone(), controls, self.executor);
        let (queue, receiver) = ChannelQueue::new(self.queue_capacity);
        let worker = spawn_worker(executor.clone(), receiver, self.max_concurrent_executions);

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(PolicyEngine::new(PolicyTable::builtin())),
            store.clone(),
            Arc::new(queue),
            fast_handoff(),
        ));

        Harness {
            dispatcher,
            store,
            executor,
            clouds: self.clouds,
            worker,
        }
    }
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<MemoryStore>,
    pub executor: Executor,
    pub clouds: HashMap<ResourceKind, Arc<SimulatedCloud>>,
    pub worker: JoinHandle<()>,
}

impl Harness {
    pub fn cloud(&self, kind: ResourceKind) -> &Arc<SimulatedCloud> {
        &self.clouds[&kind]
    }

    /// Poll the store until the execution is terminal
    pub async fn wait_terminal(&self, execution_id: &str) -> Execution {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(execution) = self.store.get(execution_id).await.unwrap() {
                if execution.status.is_terminal() {
                    return execution;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "execution {execution_id} did not finish"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
