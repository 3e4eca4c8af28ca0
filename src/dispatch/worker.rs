use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::queue::ExecutionJob;
use crate::executor::{unreported_result, Executor};
use crate::model::{Execution, ExecutionStatus, ResourceResult};
use crate::store::ExecutionStore;

/// Drain the handoff queue, running up to `max_concurrent` executions at once.
///
/// Each execution runs in its own task, detached from the request that
/// dispatched it. An execution that panics before any resource reported is
/// recorded as `Failed`; one that panics later is `Completed` with the
/// unreported resources failed. The returned
/// handle resolves once the queue is closed and every started execution has
/// finished.
pub fn spawn_worker(
    executor: Executor,
    mut receiver: mpsc::Receiver<ExecutionJob>,
    max_concurrent: usize,
) -> JoinHandle<()> {
    let max_concurrent = max_concurrent.max(1);
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    tokio::spawn(async move {
        info!("Execution worker started ({} concurrent)", max_concurrent);

        while let Some(job) = receiver.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            debug!("Picked up execution {}", job.execution_id);

            let executor = executor.clone();
            tokio::spawn(async move {
                let _permit = permit;
                run_job(executor, job).await;
            });
        }

        // wait for in-flight executions
        let _ = semaphore.acquire_many(max_concurrent as u32).await;
        info!("Execution worker stopped");
    })
}

async fn run_job(executor: Executor, job: ExecutionJob) {
    let execution_id = job.execution_id.clone();
    let runner = executor.clone();
    let outcome = tokio::spawn(async move { runner.execute(&job.execution_id, &job.plan).await }).await;

    match outcome {
        Ok(Ok(execution)) => debug!(
            "Execution {} ended {} with {} result(s)",
            execution_id,
            execution.status,
            execution.per_resource_results.len()
        ),
        Ok(Err(e)) => error!("Execution {} could not be tracked: {}", execution_id, e),
        Err(join_err) => {
            error!("Execution {} crashed: {}", execution_id, join_err);
            let note = format!("executor crashed: {join_err}");
            let store = executor.store();

            let (status, results) = match store.get(&execution_id).await {
                Ok(Some(execution)) if !execution.per_resource_results.is_empty() => {
                    (ExecutionStatus::Completed, Some(settle_after_crash(execution, &note)))
                }
                Ok(_) => (ExecutionStatus::Failed, None),
                Err(e) => {
                    error!("Could not read execution {} after crash: {}", execution_id, e);
                    (ExecutionStatus::Failed, None)
                }
            };

            if let Err(e) = store.finish(&execution_id, status, results, Some(note)).await {
                error!(
                    "Could not record crash of execution {}, leaving it to startup recovery: {}",
                    execution_id, e
                );
            }
        }
    }
}

/// Keep every reported result and fail the rest, in plan order
fn settle_after_crash(execution: Execution, note: &str) -> Vec<ResourceResult> {
    let mut reported = execution.per_resource_results;
    execution
        .plan
        .records()
        .map(|record| {
            match reported.iter().position(|r| {
                r.resource_kind == record.resource_kind && r.resource_id == record.resource_id
            }) {
                Some(found) => reported.swap_remove(found),
                None => unreported_result(
                    record,
                    format!("{note}; no outcome was reported, live state unknown"),
                ),
            }
        })
        .collect()
}
