//! Execution records and per-resource outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;
use super::resource::ResourceKind;
use crate::plan::ExecutionPlan;

/// Overall status of one remediation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Accepted,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Accepted => "accepted",
            ExecutionStatus::InProgress => "in_progress",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Phase of a resource's remediation a record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    PreconditionCheck,
    Stop,
    WaitStopped,
    Modify,
    Start,
    WaitReady,
    Verify,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::PreconditionCheck => "precondition_check",
            Step::Stop => "stop",
            Step::WaitStopped => "wait_stopped",
            Step::Modify => "modify",
            Step::Start => "start",
            Step::WaitReady => "wait_ready",
            Step::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// Why a resource ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PreconditionNotMet,
    MutationFailed,
    VerificationMismatch,
    Timeout,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::PreconditionNotMet => "PreconditionNotMet",
            FailureReason::MutationFailed => "MutationFailed",
            FailureReason::VerificationMismatch => "VerificationMismatch",
            FailureReason::Timeout => "Timeout",
            FailureReason::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOutcome {
    Succeeded,
    Failed(FailureReason),
}

impl ResourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ResourceOutcome::Succeeded)
    }
}

/// One completed step of a resource's sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub ok: bool,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Terminal result for one resource of an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    /// Last step attempted before the outcome was decided
    pub step: Step,
    pub outcome: ResourceOutcome,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
}

/// One end-to-end remediation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub action: String,
    pub status: ExecutionStatus,
    pub plan: ExecutionPlan,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub per_resource_results: Vec<ResourceResult>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Caller identity that requested the run, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    /// Set when the executor itself fails or the run was interrupted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    pub fn new(execution_id: String, action: String, plan: ExecutionPlan) -> Self {
        Self {
            execution_id,
            action,
            status: ExecutionStatus::Accepted,
            plan,
            started_at: Utc::now(),
            per_resource_results: Vec::new(),
            completed_at: None,
            requested_by: None,
            error: None,
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        let succeeded = self
            .per_resource_results
            .iter()
            .filter(|r| r.outcome.is_success())
            .count();
        ExecutionSummary {
            execution_id: self.execution_id.clone(),
            action: self.action.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            resources: self.plan.total_records(),
            succeeded,
            failed: self.per_resource_results.len() - succeeded,
            total_savings: self.plan.total_savings,
        }
    }
}

/// Compact listing view of an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub action: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub resources: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_savings: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let result = ResourceResult {
            resource_id: "i-1".into(),
            resource_kind: ResourceKind::Compute,
            step: Step::Verify,
            outcome: ResourceOutcome::Failed(FailureReason::VerificationMismatch),
            detail: "expected t3.medium, found r5.large".into(),
            steps: Vec::new(),
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["outcome"]["failed"], "verification_mismatch");
        assert_eq!(value["step"], "verify");

        let back: ResourceResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_success_outcome_is_plain_string() {
        let value = serde_json::to_value(ResourceOutcome::Succeeded).unwrap();
        assert_eq!(value, "succeeded");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Accepted.is_terminal());
        assert!(!ExecutionStatus::InProgress.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }
}
