//! Handoff queue between dispatcher and executor

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::plan::ExecutionPlan;
use crate::retry::Retryable;

/// An accepted execution waiting for the executor
#[derive(Debug, Clone)]
pub struct ExecutionJob {
    pub execution_id: String,
    pub plan: ExecutionPlan,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("execution queue is full")]
    Full,

    #[error("execution queue is closed")]
    Closed,
}

impl Retryable for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, QueueError::Full)
    }
}

#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Signal the executor; must not wait for the execution itself
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError>;
}

/// Bounded in-process queue backed by a tokio channel
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::Sender<ExecutionJob>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExecutionJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ExecutionQueue for ChannelQueue {
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}
