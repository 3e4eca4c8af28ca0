//! In-memory execution store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ExecutionStore, Mutation, StoreError, StoreResult};
use crate::model::Execution;

#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<String, Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert(&self, execution: Execution) -> StoreResult<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.execution_id) {
            return Err(StoreError::Conflict(execution.execution_id));
        }
        executions.insert(execution.execution_id.clone(), execution);
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> StoreResult<Option<Execution>> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }

    async fn remove(&self, execution_id: &str) -> StoreResult<bool> {
        Ok(self.executions.write().await.remove(execution_id).is_some())
    }

    async fn all(&self) -> StoreResult<Vec<Execution>> {
        Ok(self.executions.read().await.values().cloned().collect())
    }

    async fn update(&self, execution_id: &str, mutation: Mutation) -> StoreResult<Execution> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;
        mutation(execution);
        Ok(execution.clone())
    }
}
