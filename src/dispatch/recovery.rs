//! Startup recovery of executions left behind by a previous process
//!
//! `Accepted` executions never touched a resource and are scheduled again.
//! `InProgress` executions may have left resources mid-sequence, so they are
//! marked `Failed` instead of re-running steps against an unknown state.

use tracing::{info, warn};

use super::queue::{ExecutionJob, ExecutionQueue};
use crate::model::ExecutionStatus;
use crate::retry::RetryExecutor;
use crate::store::{ExecutionStore, StoreResult};

pub const INTERRUPTED_NOTE: &str = "interrupted: service stopped while the execution was in progress";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub interrupted: usize,
    pub unschedulable: usize,
}

pub async fn recover(
    store: &dyn ExecutionStore,
    queue: &dyn ExecutionQueue,
    handoff: &RetryExecutor,
) -> StoreResult<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut pending = store.all().await?;
    pending.sort_by(|a, b| a.started_at.cmp(&b.started_at));

    for execution in pending {
        match execution.status {
            ExecutionStatus::Accepted => {
                let job = ExecutionJob {
                    execution_id: execution.execution_id.clone(),
                    plan: execution.plan,
                };
                let scheduled = handoff
                    .execute_with_retry(|| queue.enqueue(job.clone()), "recovery handoff")
                    .await;

                match scheduled {
                    Ok(()) => report.requeued += 1,
                    Err(e) => {
                        warn!("Could not reschedule execution {}: {}", job.execution_id, e);
                        store
                            .finish(
                                &job.execution_id,
                                ExecutionStatus::Failed,
                                None,
                                Some(format!("could not be rescheduled after restart: {e}")),
                            )
                            .await?;
                        report.unschedulable += 1;
                    }
                }
            }
            ExecutionStatus::InProgress => {
                store
                    .finish(
                        &execution.execution_id,
                        ExecutionStatus::Failed,
                        None,
                        Some(INTERRUPTED_NOTE.to_string()),
                    )
                    .await?;
                report.interrupted += 1;
            }
            ExecutionStatus::Completed | ExecutionStatus::Failed => {}
        }
    }

    if report != RecoveryReport::default() {
        info!(
            "Recovered executions: {} requeued, {} interrupted, {} unschedulable",
            report.requeued, report.interrupted, report.unschedulable
        );
    }
    Ok(report)
}
