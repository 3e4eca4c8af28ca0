//! Dispatcher: accept, plan, persist and hand off
//!
//! `dispatch` never calls a cloud control plane. It annotates the records
//! against policy, compiles the plan, stores an `Accepted` execution and
//! signals the executor through an [`ExecutionQueue`]. Its latency depends
//! on the record count only through the pure plan compilation.

pub mod queue;
pub mod recovery;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::executor::remediation::Remediation;
use crate::model::{Execution, RecommendationRecord, ResourceKind};
use crate::plan::{self, ExecutionPlan};
use crate::policy::PolicyEngine;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::store::ExecutionStore;

pub use queue::{ChannelQueue, ExecutionJob, ExecutionQueue, QueueError};
pub use recovery::{recover, RecoveryReport};
pub use worker::spawn_worker;

/// What the caller gets back synchronously
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub execution_id: String,
    pub plan: ExecutionPlan,
    pub accepted_at: DateTime<Utc>,
}

pub struct Dispatcher {
    policy: Arc<PolicyEngine>,
    store: Arc<dyn ExecutionStore>,
    queue: Arc<dyn ExecutionQueue>,
    handoff: RetryExecutor,
}

impl Dispatcher {
    pub fn new(
        policy: Arc<PolicyEngine>,
        store: Arc<dyn ExecutionStore>,
        queue: Arc<dyn ExecutionQueue>,
        handoff: RetryConfig,
    ) -> Self {
        Self {
            policy,
            store,
            queue,
            handoff: RetryExecutor::new(handoff),
        }
    }

    /// Annotate, validate and compile without accepting anything.
    ///
    /// A resource may appear only once per request: its steps run as one
    /// ordered sequence and it gets exactly one outcome.
    pub fn preview(&self, records: Vec<RecommendationRecord>) -> Result<ExecutionPlan> {
        let records = self.policy.annotate(records);
        let mut seen: HashMap<(ResourceKind, &str), usize> = HashMap::new();
        for (index, record) in records.iter().enumerate() {
            let key = (record.resource_kind, record.resource_id.as_str());
            if let Some(first) = seen.insert(key, index) {
                return Err(Error::InvalidRequest(format!(
                    "recommendation {index}: {} `{}` is already targeted by recommendation {first}",
                    record.resource_kind, record.resource_id
                )));
            }
            Remediation::from_record(record).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        }
        Ok(plan::compile(&records))
    }

    /// Accept a remediation request and schedule it.
    ///
    /// Each call creates a new execution. When the handoff still fails after
    /// the bounded retries the stored record is removed again and the caller
    /// gets a `SchedulingFailure`.
    pub async fn dispatch(
        &self,
        records: Vec<RecommendationRecord>,
        action: &str,
        requested_by: Option<String>,
    ) -> Result<DispatchReceipt> {
        let action = action.trim();
        if action.is_empty() {
            return Err(Error::InvalidRequest("action is required".to_string()));
        }

        let plan = self.preview(records)?;
        let execution_id = new_execution_id();

        let mut execution = Execution::new(execution_id.clone(), action.to_string(), plan.clone());
        execution.requested_by = requested_by;
        let accepted_at = execution.started_at;
        self.store.insert(execution).await?;

        let job = ExecutionJob {
            execution_id: execution_id.clone(),
            plan: plan.clone(),
        };
        let handoff = self
            .handoff
            .execute_with_retry(|| self.queue.enqueue(job.clone()), "execution handoff")
            .await;

        if let Err(e) = handoff {
            warn!("Handoff of execution {} failed: {}", execution_id, e);
            if let Err(remove_err) = self.store.remove(&execution_id).await {
                warn!(
                    "Could not remove unscheduled execution {}: {}",
                    execution_id, remove_err
                );
            }
            return Err(Error::SchedulingFailure(format!(
                "could not schedule execution: {e}"
            )));
        }

        info!(
            execution_id = %execution_id,
            "Accepted {} resource(s) for '{}', estimated savings {}{}",
            plan.total_records(),
            action,
            plan.total_savings,
            if plan.savings_partial { " (partial)" } else { "" }
        );
        debug!("Plan for {}:\n{}", execution_id, plan.text);

        Ok(DispatchReceipt {
            execution_id,
            plan,
            accepted_at,
        })
    }
}

/// Time-ordered id, unique within the retention window
fn new_execution_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("workflow-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionStatus;
    use crate::policy::PolicyTable;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` enqueues with the given error
    struct FlakyQueue {
        failures: usize,
        error: QueueError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionQueue for FlakyQueue {
        async fn enqueue(&self, _job: ExecutionJob) -> std::result::Result<(), QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
            ..Default::default()
        }
    }

    fn dispatcher(queue: Arc<dyn ExecutionQueue>) -> (Dispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(
            Arc::new(PolicyEngine::new(PolicyTable::builtin())),
            store.clone(),
            queue,
            fast_retry(),
        );
        (dispatcher, store)
    }

    fn compute(id: &str) -> RecommendationRecord {
        RecommendationRecord::new(ResourceKind::Compute, id)
            .with_current("instance_type", "r5.large")
            .with_suggested("instance_type", "t3.medium")
            .with_savings("$50.00")
    }

    #[tokio::test]
    async fn test_dispatch_stores_accepted_execution() {
        let (queue, mut receiver) = ChannelQueue::new(4);
        let (dispatcher, store) = dispatcher(Arc::new(queue));

        let receipt = dispatcher
            .dispatch(vec![compute("r-1")], "execute", Some("ops".into()))
            .await
            .unwrap();

        assert!(receipt.execution_id.starts_with("workflow-"));
        let stored = store.get(&receipt.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Accepted);
        assert_eq!(stored.requested_by.as_deref(), Some("ops"));
        assert_eq!(stored.plan, receipt.plan);

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.execution_id, receipt.execution_id);
    }

    #[tokio::test]
    async fn test_each_dispatch_gets_a_new_id() {
        let (queue, _receiver) = ChannelQueue::new(4);
        let (dispatcher, _) = dispatcher(Arc::new(queue));

        let a = dispatcher.dispatch(vec![compute("r-1")], "execute", None).await.unwrap();
        let b = dispatcher.dispatch(vec![compute("r-1")], "execute", None).await.unwrap();
        assert_ne!(a.execution_id, b.execution_id);
    }

    #[tokio::test]
    async fn test_transient_handoff_failure_is_retried() {
        let queue = Arc::new(FlakyQueue {
            failures: 2,
            error: QueueError::Full,
            calls: AtomicUsize::new(0),
        });
        let (dispatcher, store) = dispatcher(queue.clone());

        let receipt = dispatcher.dispatch(vec![compute("r-1")], "execute", None).await.unwrap();
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        assert!(store.get(&receipt.execution_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exhausted_handoff_leaves_no_execution() {
        let queue = Arc::new(FlakyQueue {
            failures: usize::MAX,
            error: QueueError::Full,
            calls: AtomicUsize::new(0),
        });
        let (dispatcher, store) = dispatcher(queue.clone());

        let err = dispatcher
            .dispatch(vec![compute("r-1")], "execute", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchedulingFailure(_)));
        assert_eq!(err.status_code(), 503);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_queue_is_not_retried() {
        let queue = Arc::new(FlakyQueue {
            failures: usize::MAX,
            error: QueueError::Closed,
            calls: AtomicUsize::new(0),
        });
        let (dispatcher, _) = dispatcher(queue.clone());

        assert!(dispatcher.dispatch(vec![], "execute", None).await.is_err());
        assert_eq!(queue.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected_before_storing() {
        let (queue, _receiver) = ChannelQueue::new(4);
        let (dispatcher, store) = dispatcher(Arc::new(queue));

        let err = dispatcher.dispatch(vec![], "  ", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        // function record with nothing to change
        let incomplete = RecommendationRecord::new(ResourceKind::Function, "fn-1");
        let err = dispatcher.dispatch(vec![incomplete], "execute", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_resource_is_rejected() {
        let (queue, _receiver) = ChannelQueue::new(4);
        let (dispatcher, store) = dispatcher(Arc::new(queue));

        let err = dispatcher
            .dispatch(vec![compute("r-1"), compute("r-2"), compute("r-1")], "execute", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(err.status_code(), 400);
        let message = err.to_string();
        assert!(message.contains("recommendation 2"), "{message}");
        assert!(message.contains("recommendation 0"), "{message}");
        assert!(store.all().await.unwrap().is_empty());

        // same id under another kind is a different resource
        let volume = RecommendationRecord::new(ResourceKind::BlockVolume, "r-1")
            .with_current("volume_type", "io1")
            .with_suggested("volume_type", "gp3");
        assert!(dispatcher
            .dispatch(vec![compute("r-1"), volume], "execute", None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_policy_fills_missing_suggestion() {
        let (queue, _receiver) = ChannelQueue::new(4);
        let (dispatcher, _) = dispatcher(Arc::new(queue));

        let record = RecommendationRecord::new(ResourceKind::BlockVolume, "vol-1")
            .with_current("volume_type", "io1");
        let receipt = dispatcher.dispatch(vec![record], "execute", None).await.unwrap();

        let planned = receipt.plan.records().next().unwrap();
        assert_eq!(planned.suggested_configuration["volume_type"], "gp3");
        assert!(planned.policy_rule_id.is_some());
    }
}
