//! Execution state store
//!
//! The store is the only channel between the dispatcher and the executor:
//! the dispatcher inserts an `Accepted` record, the executor mutates it until
//! it is terminal, and pollers read it. Backends implement a small set of
//! primitives; the lifecycle helpers are provided on top of `update`.

pub mod file;
pub mod memory;
pub mod retention;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Execution, ExecutionStatus, ExecutionSummary, ResourceResult};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use retention::spawn_purge_task;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Execution not found: {0}")]
    NotFound(String),

    #[error("Execution already exists: {0}")]
    Conflict(String),
}

/// In-place change applied to a stored execution
pub type Mutation = Box<dyn FnOnce(&mut Execution) + Send>;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Store a new execution; fails if the id is taken
    async fn insert(&self, execution: Execution) -> StoreResult<()>;

    async fn get(&self, execution_id: &str) -> StoreResult<Option<Execution>>;

    /// Returns whether a record was removed
    async fn remove(&self, execution_id: &str) -> StoreResult<bool>;

    async fn all(&self) -> StoreResult<Vec<Execution>>;

    /// Apply `mutation` atomically and return the updated record
    async fn update(&self, execution_id: &str, mutation: Mutation) -> StoreResult<Execution>;

    /// Summaries, most recently started first
    async fn list(&self) -> StoreResult<Vec<ExecutionSummary>> {
        let mut executions = self.all().await?;
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions.iter().map(Execution::summary).collect())
    }

    async fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> StoreResult<Execution> {
        self.update(execution_id, Box::new(move |e| e.status = status))
            .await
    }

    /// Append one terminal resource result as soon as it is known
    async fn record_result(&self, execution_id: &str, result: ResourceResult) -> StoreResult<Execution> {
        self.update(
            execution_id,
            Box::new(move |e| e.per_resource_results.push(result)),
        )
        .await
    }

    /// Move an execution to a terminal status.
    ///
    /// `results`, when given, replaces the accumulated results (used to store
    /// them in plan order).
    async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        results: Option<Vec<ResourceResult>>,
        error: Option<String>,
    ) -> StoreResult<Execution> {
        self.update(
            execution_id,
            Box::new(move |e| {
                e.status = status;
                if let Some(results) = results {
                    e.per_resource_results = results;
                }
                if error.is_some() {
                    e.error = error;
                }
                e.completed_at = Some(Utc::now());
            }),
        )
        .await
    }

    /// Remove terminal executions completed before `cutoff`
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut purged = 0;
        for execution in self.all().await? {
            if is_expired(&execution, cutoff) && self.remove(&execution.execution_id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

pub(crate) fn is_expired(execution: &Execution, cutoff: DateTime<Utc>) -> bool {
    execution.status.is_terminal()
        && execution
            .completed_at
            .map(|completed| completed < cutoff)
            .unwrap_or(false)
}
