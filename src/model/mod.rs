//! Core data model shared by the policy engine, plan compiler, dispatcher and executor
//!
//! Recommendation records flow in from the Advisor (or the policy engine),
//! are compiled into an [`crate::plan::ExecutionPlan`], and are tracked as an
//! [`Execution`] until every resource reaches a terminal outcome.

pub mod execution;
pub mod money;
pub mod resource;

pub use execution::{
    Execution, ExecutionStatus, ExecutionSummary, FailureReason, ResourceOutcome, ResourceResult,
    Step, StepRecord,
};
pub use money::Money;
pub use resource::{Configuration, RecommendationRecord, ResourceKind};
