//! Durable execution store: one JSON document per execution

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ExecutionStore, Mutation, StoreError, StoreResult};
use crate::model::Execution;

pub struct FileStore {
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        debug!("Execution store at {}", base_dir.display());

        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// None for ids that cannot name a file in the store directory
    fn path_for(&self, execution_id: &str) -> Option<PathBuf> {
        let valid = !execution_id.is_empty()
            && execution_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.base_dir.join(format!("{execution_id}.json")))
    }

    async fn read(&self, path: &Path) -> StoreResult<Option<Execution>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temporary sibling, then rename over the target
    async fn write_atomic<T: Serialize>(&self, path: &Path, data: &T) -> StoreResult<()> {
        let content = serde_json::to_vec_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for FileStore {
    async fn insert(&self, execution: Execution) -> StoreResult<()> {
        let path = self
            .path_for(&execution.execution_id)
            .ok_or_else(|| StoreError::NotFound(execution.execution_id.clone()))?;

        let _guard = self.write_lock.lock().await;
        if fs::try_exists(&path).await? {
            return Err(StoreError::Conflict(execution.execution_id));
        }
        self.write_atomic(&path, &execution).await
    }

    async fn get(&self, execution_id: &str) -> StoreResult<Option<Execution>> {
        match self.path_for(execution_id) {
            Some(path) => self.read(&path).await,
            None => Ok(None),
        }
    }

    async fn remove(&self, execution_id: &str) -> StoreResult<bool> {
        let Some(path) = self.path_for(execution_id) else {
            return Ok(false);
        };

        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn all(&self) -> StoreResult<Vec<Execution>> {
        let mut executions = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(execution)) => executions.push(execution),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable execution file {}: {}", path.display(), e),
            }
        }

        Ok(executions)
    }

    async fn update(&self, execution_id: &str, mutation: Mutation) -> StoreResult<Execution> {
        let path = self
            .path_for(execution_id)
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;

        let _guard = self.write_lock.lock().await;
        let mut execution = self
            .read(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;
        mutation(&mut execution);
        self.write_atomic(&path, &execution).await?;
        Ok(execution)
    }
}
