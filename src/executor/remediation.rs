//! Kind-specific remediation steps
//!
//! One variant per resource kind, each implementing the same three-phase
//! interface. Adding a kind means adding a variant and its
//! [`RemediationSteps`] impl. No variant ever deletes anything.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::cancel::{CancelCause, CancelToken};
use super::state_machine::StateError;
use super::wait::{wait_for_state, WaitError, WaitPolicy};
use crate::cloud::{CloudControl, CloudError, ResourceSnapshot};
use crate::model::{Configuration, RecommendationRecord, ResourceKind, Step, StepRecord};
use crate::retry::RetryExecutor;

#[derive(Debug, Error)]
pub enum StepError {
    /// The live resource is not in a state the phase accepts
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("interrupted: {0:?}")]
    Cancelled(CancelCause),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<WaitError> for StepError {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::Cloud(e) => StepError::Cloud(e),
            WaitError::Cancelled(cause) => StepError::Cancelled(cause),
            timeout @ WaitError::Timeout { .. } => StepError::Timeout(timeout.to_string()),
        }
    }
}

pub type StepResult<T> = Result<T, StepError>;

/// A record's suggested configuration cannot be turned into a remediation
#[derive(Debug, Error)]
#[error("resource '{resource_id}': {reason}")]
pub struct RemediationError {
    pub resource_id: String,
    pub reason: String,
}

/// Everything one resource's step sequence needs, plus its step log
pub struct StepContext {
    resource_id: String,
    control: Arc<dyn CloudControl>,
    retry: RetryExecutor,
    wait: WaitPolicy,
    cancel: CancelToken,
    current: Step,
    steps: Vec<StepRecord>,
}

impl StepContext {
    pub fn new(
        resource_id: impl Into<String>,
        control: Arc<dyn CloudControl>,
        retry: RetryExecutor,
        wait: WaitPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            control,
            retry,
            wait,
            cancel,
            current: Step::PreconditionCheck,
            steps: Vec::new(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Last step attempted
    pub fn current_step(&self) -> Step {
        self.current
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<StepRecord> {
        self.steps
    }

    /// Fails if cancellation was raised
    pub fn checkpoint(&self) -> StepResult<()> {
        match self.cancel.cause() {
            Some(cause) => Err(StepError::Cancelled(cause)),
            None => Ok(()),
        }
    }

    fn enter(&mut self, step: Step) -> StepResult<()> {
        self.checkpoint()?;
        self.current = step;
        debug!("{} entering {}", self.resource_id, step);
        Ok(())
    }

    fn record(&mut self, step: Step, ok: bool, detail: impl Into<String>) {
        self.steps.push(StepRecord {
            step,
            ok,
            detail: detail.into(),
            at: Utc::now(),
        });
    }

    /// Run `step` and log its result in the step log
    async fn run<T, F, Fut>(&mut self, step: Step, op: F) -> StepResult<T>
    where
        F: FnOnce(Arc<dyn CloudControl>, RetryExecutor, String) -> Fut,
        Fut: std::future::Future<Output = Result<(T, String), CloudError>>,
    {
        self.enter(step)?;
        let call = op(
            self.control.clone(),
            self.retry.clone(),
            self.resource_id.clone(),
        );
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            result = call => result.map_err(StepError::from),
            cause = cancel.cancelled() => Err(StepError::Cancelled(cause)),
        };

        match result {
            Ok((value, detail)) => {
                self.record(step, true, detail);
                Ok(value)
            }
            Err(e) => {
                self.record(step, false, e.to_string());
                Err(e)
            }
        }
    }

    pub async fn read(&mut self, step: Step) -> StepResult<ResourceSnapshot> {
        self.run(step, |control, retry, id| async move {
            let context = format!("read state of {id}");
            let snapshot = retry
                .execute_with_retry(|| control.read_state(&id), &context)
                .await?;
            let detail = format!("state '{}'", snapshot.state);
            Ok((snapshot, detail))
        })
        .await
    }

    pub async fn stop(&mut self) -> StepResult<()> {
        self.run(Step::Stop, |control, retry, id| async move {
            let context = format!("stop {id}");
            retry.execute_with_retry(|| control.stop(&id), &context).await?;
            Ok(((), "stop requested".to_string()))
        })
        .await
    }

    pub async fn start(&mut self) -> StepResult<()> {
        self.run(Step::Start, |control, retry, id| async move {
            let context = format!("start {id}");
            retry.execute_with_retry(|| control.start(&id), &context).await?;
            Ok(((), "start requested".to_string()))
        })
        .await
    }

    pub async fn modify(&mut self, changes: Configuration) -> StepResult<()> {
        self.run(Step::Modify, |control, retry, id| async move {
            let context = format!("modify {id}");
            retry
                .execute_with_retry(|| control.modify(&id, &changes), &context)
                .await?;
            Ok(((), format!("applied {}", describe_config(&changes))))
        })
        .await
    }

    pub async fn wait_for(&mut self, step: Step, targets: &[&str]) -> StepResult<ResourceSnapshot> {
        self.enter(step)?;
        let result = wait_for_state(
            self.control.as_ref(),
            &self.resource_id,
            targets,
            &self.wait,
            &self.retry,
            &self.cancel,
        )
        .await
        .map_err(StepError::from);

        match result {
            Ok(snapshot) => {
                self.record(step, true, format!("reached '{}'", snapshot.state));
                Ok(snapshot)
            }
            Err(e) => {
                self.record(step, false, e.to_string());
                Err(e)
            }
        }
    }

    /// Record a rejection of the current step and return it as an error
    fn reject(&mut self, detail: String) -> StepError {
        let step = self.current;
        self.record(step, false, detail.clone());
        StepError::Rejected(detail)
    }
}

#[async_trait]
pub trait RemediationSteps: Send + Sync {
    /// Confirm mutation is safe and needed
    async fn precondition(&self, ctx: &mut StepContext) -> StepResult<()>;

    async fn mutate(&self, ctx: &mut StepContext) -> StepResult<()>;

    /// Re-read the live resource and compare against the targets
    async fn verify(&self, ctx: &mut StepContext) -> StepResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeResize {
    pub instance_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLifecycle {
    pub storage_class: String,
    pub transition_days: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionTuning {
    pub memory_mb: Option<String>,
    pub reserved_concurrency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseResize {
    pub instance_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeModify {
    pub volume_type: String,
    pub size_gb: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    Compute(ComputeResize),
    ObjectStorage(StorageLifecycle),
    Function(FunctionTuning),
    RelationalDB(DatabaseResize),
    BlockVolume(VolumeModify),
}

impl Remediation {
    /// Build the remediation for a record, checking its required keys
    pub fn from_record(record: &RecommendationRecord) -> Result<Self, RemediationError> {
        let suggested = &record.suggested_configuration;
        let missing = |key: &str| RemediationError {
            resource_id: record.resource_id.clone(),
            reason: format!(
                "suggested_configuration is missing '{key}' for {} remediation",
                record.resource_kind
            ),
        };
        let get = |key: &str| suggested.get(key).filter(|v| !v.trim().is_empty()).cloned();

        let remediation = match record.resource_kind {
            ResourceKind::Compute => Remediation::Compute(ComputeResize {
                instance_type: get("instance_type").ok_or_else(|| missing("instance_type"))?,
            }),
            ResourceKind::ObjectStorage => Remediation::ObjectStorage(StorageLifecycle {
                storage_class: get("storage_class").ok_or_else(|| missing("storage_class"))?,
                transition_days: get("transition_days"),
            }),
            ResourceKind::Function => {
                let tuning = FunctionTuning {
                    memory_mb: get("memory_mb"),
                    reserved_concurrency: get("reserved_concurrency"),
                };
                if tuning.memory_mb.is_none() && tuning.reserved_concurrency.is_none() {
                    return Err(RemediationError {
                        resource_id: record.resource_id.clone(),
                        reason: "suggested_configuration needs 'memory_mb' or 'reserved_concurrency' for function remediation".to_string(),
                    });
                }
                Remediation::Function(tuning)
            }
            ResourceKind::RelationalDB => Remediation::RelationalDB(DatabaseResize {
                instance_class: get("instance_class").ok_or_else(|| missing("instance_class"))?,
            }),
            ResourceKind::BlockVolume => Remediation::BlockVolume(VolumeModify {
                volume_type: get("volume_type").ok_or_else(|| missing("volume_type"))?,
                size_gb: get("size_gb"),
            }),
        };

        Ok(remediation)
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Remediation::Compute(_) => ResourceKind::Compute,
            Remediation::ObjectStorage(_) => ResourceKind::ObjectStorage,
            Remediation::Function(_) => ResourceKind::Function,
            Remediation::RelationalDB(_) => ResourceKind::RelationalDB,
            Remediation::BlockVolume(_) => ResourceKind::BlockVolume,
        }
    }

    pub fn steps(&self) -> &dyn RemediationSteps {
        match self {
            Remediation::Compute(r) => r,
            Remediation::ObjectStorage(r) => r,
            Remediation::Function(r) => r,
            Remediation::RelationalDB(r) => r,
            Remediation::BlockVolume(r) => r,
        }
    }
}

fn describe_config(config: &Configuration) -> String {
    config
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Target keys whose live value differs, as `key: live -> target`
fn differences(live: &Configuration, targets: &Configuration) -> Vec<String> {
    targets
        .iter()
        .filter(|(key, target)| {
            live.get(*key)
                .map(|value| !same(value, target))
                .unwrap_or(true)
        })
        .map(|(key, target)| {
            let current = live.get(key).map(String::as_str).unwrap_or("unset");
            format!("{key}: {current} -> {target}")
        })
        .collect()
}

/// Shared precondition: resource readable, in an accepted state, not already at target
async fn check_ready(
    ctx: &mut StepContext,
    accepted_states: &[&str],
    targets: &Configuration,
) -> StepResult<ResourceSnapshot> {
    let snapshot = match ctx.read(Step::PreconditionCheck).await {
        Ok(snapshot) => snapshot,
        Err(StepError::Cloud(CloudError::NotFound(id))) => {
            return Err(ctx.reject(format!("resource {id} does not exist")));
        }
        Err(e) => return Err(e),
    };

    if !snapshot.is_in(accepted_states) {
        return Err(ctx.reject(format!(
            "state '{}' is not one of {:?}",
            snapshot.state, accepted_states
        )));
    }

    if differences(&snapshot.configuration, targets).is_empty() {
        return Err(ctx.reject(format!(
            "already at target configuration ({})",
            describe_config(targets)
        )));
    }

    Ok(snapshot)
}

/// Shared verification: live values equal targets, and the state is acceptable
async fn check_applied(
    ctx: &mut StepContext,
    targets: &Configuration,
    expected_states: &[&str],
) -> StepResult<()> {
    let snapshot = match ctx.read(Step::Verify).await {
        Ok(snapshot) => snapshot,
        Err(StepError::Cloud(e)) => {
            return Err(ctx.reject(format!("could not read back configuration: {e}")));
        }
        Err(e) => return Err(e),
    };

    let mut mismatches = differences(&snapshot.configuration, targets);
    if !expected_states.is_empty() && !snapshot.is_in(expected_states) {
        mismatches.push(format!(
            "state: {} -> one of {:?}",
            snapshot.state, expected_states
        ));
    }

    if mismatches.is_empty() {
        info!("{} verified ({})", ctx.resource_id(), describe_config(targets));
        Ok(())
    } else {
        Err(ctx.reject(format!("live configuration differs: {}", mismatches.join("; "))))
    }
}

fn config_of(pairs: &[(&str, Option<&String>)]) -> Configuration {
    pairs
        .iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.clone())))
        .collect()
}

impl ComputeResize {
    fn targets(&self) -> Configuration {
        config_of(&[("instance_type", Some(&self.instance_type))])
    }
}

#[async_trait]
impl RemediationSteps for ComputeResize {
    async fn precondition(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_ready(ctx, &["running", "stopped"], &self.targets()).await?;
        Ok(())
    }

    async fn mutate(&self, ctx: &mut StepContext) -> StepResult<()> {
        ctx.stop().await?;
        ctx.wait_for(Step::WaitStopped, &["stopped"]).await?;
        ctx.modify(self.targets()).await?;
        ctx.start().await?;
        ctx.wait_for(Step::WaitReady, &["running"]).await?;
        Ok(())
    }

    async fn verify(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_applied(ctx, &self.targets(), &["running"]).await
    }
}

impl StorageLifecycle {
    fn targets(&self) -> Configuration {
        config_of(&[("storage_class", Some(&self.storage_class))])
    }
}

#[async_trait]
impl RemediationSteps for StorageLifecycle {
    async fn precondition(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_ready(ctx, &["available", "active", "exists"], &self.targets()).await?;
        Ok(())
    }

    async fn mutate(&self, ctx: &mut StepContext) -> StepResult<()> {
        let changes = config_of(&[
            ("storage_class", Some(&self.storage_class)),
            ("transition_days", self.transition_days.as_ref()),
        ]);
        ctx.modify(changes).await
    }

    async fn verify(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_applied(ctx, &self.targets(), &[]).await
    }
}

impl FunctionTuning {
    fn targets(&self) -> Configuration {
        config_of(&[
            ("memory_mb", self.memory_mb.as_ref()),
            ("reserved_concurrency", self.reserved_concurrency.as_ref()),
        ])
    }
}

#[async_trait]
impl RemediationSteps for FunctionTuning {
    async fn precondition(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_ready(ctx, &["active"], &self.targets()).await?;
        Ok(())
    }

    async fn mutate(&self, ctx: &mut StepContext) -> StepResult<()> {
        ctx.modify(self.targets()).await
    }

    async fn verify(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_applied(ctx, &self.targets(), &[]).await
    }
}

impl DatabaseResize {
    fn targets(&self) -> Configuration {
        config_of(&[("instance_class", Some(&self.instance_class))])
    }
}

#[async_trait]
impl RemediationSteps for DatabaseResize {
    async fn precondition(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_ready(ctx, &["available"], &self.targets()).await?;
        Ok(())
    }

    async fn mutate(&self, ctx: &mut StepContext) -> StepResult<()> {
        ctx.modify(self.targets()).await?;
        ctx.wait_for(Step::WaitReady, &["available"]).await?;
        Ok(())
    }

    async fn verify(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_applied(ctx, &self.targets(), &["available"]).await
    }
}

impl VolumeModify {
    fn targets(&self) -> Configuration {
        config_of(&[
            ("volume_type", Some(&self.volume_type)),
            ("size_gb", self.size_gb.as_ref()),
        ])
    }
}

const VOLUME_SETTLED: &[&str] = &["available", "in-use"];

#[async_trait]
impl RemediationSteps for VolumeModify {
    async fn precondition(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_ready(ctx, VOLUME_SETTLED, &self.targets()).await?;
        Ok(())
    }

    async fn mutate(&self, ctx: &mut StepContext) -> StepResult<()> {
        ctx.modify(self.targets()).await?;
        ctx.wait_for(Step::WaitReady, VOLUME_SETTLED).await?;
        Ok(())
    }

    async fn verify(&self, ctx: &mut StepContext) -> StepResult<()> {
        check_applied(ctx, &self.targets(), VOLUME_SETTLED).await
    }
}
