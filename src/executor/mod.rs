//! Out-of-band executor
//!
//! Runs every resource of a plan through its remediation state machine,
//! concurrently across resources and strictly ordered within one. A failing
//! resource never aborts its siblings. The execution completes once every
//! resource has a terminal outcome; results are stored as they arrive and
//! rewritten in plan order at the end.

pub mod cancel;
pub mod remediation;
pub mod state_machine;
pub mod wait;

#[cfg(test)]
mod executor_tests;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cloud::CloudControls;
use crate::config::ExecutorConfig;
use crate::model::{
    Execution, ExecutionStatus, FailureReason, RecommendationRecord, ResourceOutcome,
    ResourceResult, Step,
};
use crate::plan::ExecutionPlan;
use crate::retry::RetryExecutor;
use crate::store::{ExecutionStore, StoreResult};

use cancel::{CancelCause, CancelSignal, CancelToken};
use remediation::{Remediation, StepContext, StepError};
use state_machine::{
    apply_transition, state_to_outcome, ResourceState, StateError, Transition,
};
use wait::WaitPolicy;

pub use remediation::RemediationError;

#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn ExecutionStore>,
    controls: CloudControls,
    config: ExecutorConfig,
    running: Arc<RwLock<HashMap<String, Arc<CancelSignal>>>>,
}

impl Executor {
    pub fn new(store: Arc<dyn ExecutionStore>, controls: CloudControls, config: ExecutorConfig) -> Self {
        Self {
            store,
            controls,
            config,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Raise cancellation for a running execution.
    ///
    /// Returns false when the execution is not running here.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        match self.running.read().await.get(execution_id) {
            Some(signal) => {
                let raised = signal.cancel(CancelCause::Requested);
                if raised {
                    info!("Cancellation requested for execution {}", execution_id);
                }
                raised
            }
            None => false,
        }
    }

    pub async fn is_running(&self, execution_id: &str) -> bool {
        self.running.read().await.contains_key(execution_id)
    }

    /// Run an accepted execution to a terminal status
    pub async fn execute(&self, execution_id: &str, plan: &ExecutionPlan) -> StoreResult<Execution> {
        let span = info_span!("execution", execution_id = %execution_id);
        self.execute_inner(execution_id, plan).instrument(span).await
    }

    async fn execute_inner(&self, execution_id: &str, plan: &ExecutionPlan) -> StoreResult<Execution> {
        if let Err(e) = self.store.set_status(execution_id, ExecutionStatus::InProgress).await {
            error!("Could not start execution {}: {}", execution_id, e);
            if let Err(finish_err) = self
                .store
                .finish(
                    execution_id,
                    ExecutionStatus::Failed,
                    None,
                    Some(format!("executor failed to start: {e}")),
                )
                .await
            {
                error!(
                    execution_id = %execution_id,
                    "Could not mark execution failed, leaving it to startup recovery: {}",
                    finish_err
                );
            }
            return Err(e);
        }

        let records: Vec<RecommendationRecord> = plan.records().cloned().collect();
        info!(
            "Executing {} resource(s), estimated savings {}",
            records.len(),
            plan.total_savings
        );

        if records.is_empty() {
            info!("Nothing to remediate");
            return self
                .store
                .finish(execution_id, ExecutionStatus::Completed, Some(Vec::new()), None)
                .await;
        }

        let (signal, token) = CancelSignal::new();
        let signal = Arc::new(signal);
        self.running
            .write()
            .await
            .insert(execution_id.to_string(), signal.clone());

        let budget = self.config.execution_budget;
        let budget_signal = signal.clone();
        let budget_timer = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            if budget_signal.cancel(CancelCause::BudgetExhausted) {
                warn!("Execution budget of {:?} exhausted", budget);
            }
        });

        let results = self.run_resources(execution_id, records, token).await;

        budget_timer.abort();
        self.running.write().await.remove(execution_id);

        let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
        info!(
            "Execution finished: {} succeeded, {} failed",
            succeeded,
            results.len() - succeeded
        );

        self.store
            .finish(execution_id, ExecutionStatus::Completed, Some(results), None)
            .await
    }

    /// Fan out one task per resource and collect results in plan order
    async fn run_resources(
        &self,
        execution_id: &str,
        records: Vec<RecommendationRecord>,
        token: CancelToken,
    ) -> Vec<ResourceResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_resources));
        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::new();
        let mut slots: Vec<Option<ResourceResult>> = vec![None; records.len()];
        // last state each task reached, readable after the task is gone
        let mut progress = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let (progress_tx, progress_rx) = watch::channel(ResourceState::Pending);
            progress.push(progress_rx);
            let worker = ResourceWorker {
                record: record.clone(),
                controls: self.controls.clone(),
                config: self.config.clone(),
                token: token.clone(),
                progress: progress_tx,
            };
            let semaphore = semaphore.clone();
            let span = info_span!(
                "resource",
                resource_id = %record.resource_id,
                kind = %record.resource_kind
            );

            let handle = tasks.spawn(
                async move {
                    let _permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit.ok(),
                        _ = worker.token.cancelled() => None,
                    };
                    (index, worker.run().await)
                }
                .instrument(span),
            );
            task_index.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (index, result) = match joined {
                Ok((_, (index, result))) => (index, result),
                Err(join_error) => {
                    let Some(&index) = task_index.get(&join_error.id()) else {
                        error!("Lost track of a resource task: {}", join_error);
                        continue;
                    };
                    let last = *progress[index].borrow();
                    error!(
                        "Resource task for {} aborted in {:?}: {}",
                        records[index].resource_id, last, join_error
                    );
                    (
                        index,
                        aborted_result(
                            &records[index],
                            last,
                            format!("remediation task aborted: {join_error}"),
                        ),
                    )
                }
            };

            if let Err(e) = self.store.record_result(execution_id, result.clone()).await {
                warn!("Could not record result for {}: {}", result.resource_id, e);
            }
            slots[index] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }
}

/// Owned inputs for one resource's task
struct ResourceWorker {
    record: RecommendationRecord,
    controls: CloudControls,
    config: ExecutorConfig,
    token: CancelToken,
    progress: watch::Sender<ResourceState>,
}

impl ResourceWorker {
    async fn run(self) -> ResourceResult {
        let record = &self.record;

        let remediation = match Remediation::from_record(record) {
            Ok(remediation) => remediation,
            Err(e) => {
                return self.fail_before_start(FailureReason::PreconditionNotMet, e.to_string());
            }
        };
        let Some(control) = self.controls.for_kind(record.resource_kind) else {
            return self.fail_before_start(
                FailureReason::PreconditionNotMet,
                format!("no cloud control configured for {}", record.resource_kind),
            );
        };

        let mut ctx = StepContext::new(
            record.resource_id.clone(),
            control,
            RetryExecutor::new(self.config.cloud_retry.clone()),
            WaitPolicy {
                poll: self.config.poll.clone(),
                timeout: self.config.wait_timeout,
            },
            self.token.clone(),
        );
        let mut state = ResourceState::Pending;

        let sequence = tokio::select! {
            result = run_sequence(&remediation, &mut ctx, &mut state, &self.progress) => result,
            _ = tokio::time::sleep(self.config.resource_timeout) => Err(StepError::Timeout(format!(
                "resource did not finish within {:?}",
                self.config.resource_timeout
            ))),
        };

        let detail = match &sequence {
            Ok(()) => "remediation applied and verified".to_string(),
            Err(e) => e.to_string(),
        };

        if let Err(e) = &sequence {
            let reason = match e {
                StepError::Timeout(_) => FailureReason::Timeout,
                StepError::Cancelled(cause) => cause.failure_reason(),
                _ => state.phase_failure().unwrap_or(FailureReason::MutationFailed),
            };
            state = match apply_transition(state, Transition::Fail(reason)) {
                Ok(next) => next,
                Err(invalid) => {
                    error!("{}", invalid);
                    ResourceState::Failed(reason)
                }
            };
        }

        let outcome = state_to_outcome(state)
            .unwrap_or(ResourceOutcome::Failed(FailureReason::MutationFailed));
        match outcome {
            ResourceOutcome::Succeeded => info!("Resource {} remediated", record.resource_id),
            ResourceOutcome::Failed(reason) => {
                warn!("Resource {} failed ({}): {}", record.resource_id, reason, detail)
            }
        }

        ResourceResult {
            resource_id: record.resource_id.clone(),
            resource_kind: record.resource_kind,
            step: ctx.current_step(),
            outcome,
            detail,
            steps: ctx.into_steps(),
        }
    }

    /// Outcome for a resource that never reached a cloud call.
    ///
    /// Cancellation that was raised before the resource started wins over
    /// the given reason.
    fn fail_before_start(&self, reason: FailureReason, detail: String) -> ResourceResult {
        let reason = self
            .token
            .cause()
            .map(|cause| cause.failure_reason())
            .unwrap_or(reason);
        failed_result(&self.record, Step::PreconditionCheck, reason, detail)
    }
}

async fn run_sequence(
    remediation: &Remediation,
    ctx: &mut StepContext,
    state: &mut ResourceState,
    progress: &watch::Sender<ResourceState>,
) -> Result<(), StepError> {
    let steps = remediation.steps();

    ctx.checkpoint()?;
    advance(state, Transition::Begin, progress)?;
    steps.precondition(ctx).await?;

    advance(state, Transition::PreconditionPassed, progress)?;
    debug!("Precondition passed for {}", ctx.resource_id());
    steps.mutate(ctx).await?;

    advance(state, Transition::MutationApplied, progress)?;
    steps.verify(ctx).await?;

    advance(state, Transition::Verified, progress)?;
    Ok(())
}

fn advance(
    state: &mut ResourceState,
    transition: Transition,
    progress: &watch::Sender<ResourceState>,
) -> Result<(), StateError> {
    *state = apply_transition(*state, transition)?;
    progress.send_replace(*state);
    Ok(())
}

/// Step a failure with `reason` is attributed to
fn failure_step(reason: FailureReason) -> Step {
    match reason {
        FailureReason::MutationFailed => Step::Modify,
        FailureReason::VerificationMismatch => Step::Verify,
        FailureReason::PreconditionNotMet | FailureReason::Timeout | FailureReason::Cancelled => {
            Step::PreconditionCheck
        }
    }
}

/// Result for a resource whose task died, charged to the phase it last reached
fn aborted_result(record: &RecommendationRecord, last: ResourceState, detail: String) -> ResourceResult {
    let reason = match last {
        ResourceState::Succeeded => {
            return ResourceResult {
                resource_id: record.resource_id.clone(),
                resource_kind: record.resource_kind,
                step: Step::Verify,
                outcome: ResourceOutcome::Succeeded,
                detail,
                steps: Vec::new(),
            };
        }
        ResourceState::Failed(reason) => reason,
        ResourceState::Pending => FailureReason::PreconditionNotMet,
        in_flight => in_flight
            .phase_failure()
            .unwrap_or(FailureReason::PreconditionNotMet),
    };
    failed_result(record, failure_step(reason), reason, detail)
}

/// Result for a resource that never reported an outcome before its
/// execution crashed. Its live state is unknown, so it is charged to the
/// mutation.
pub fn unreported_result(record: &RecommendationRecord, detail: String) -> ResourceResult {
    failed_result(record, Step::Modify, FailureReason::MutationFailed, detail)
}

fn failed_result(
    record: &RecommendationRecord,
    step: Step,
    reason: FailureReason,
    detail: String,
) -> ResourceResult {
    warn!("Resource {} failed ({}): {}", record.resource_id, reason, detail);
    ResourceResult {
        resource_id: record.resource_id.clone(),
        resource_kind: record.resource_kind,
        step,
        outcome: ResourceOutcome::Failed(reason),
        detail,
        steps: Vec::new(),
    }
}
