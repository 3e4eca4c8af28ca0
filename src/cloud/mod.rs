//! Cloud-control collaborators
//!
//! One [`CloudControl`] per resource kind performs the only side effects the
//! executor ever issues: read, stop, start and modify. There is deliberately
//! no delete operation.

pub mod http;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Configuration, ResourceKind};
use crate::retry::Retryable;

pub use http::HttpCloudControl;
pub use simulated::{Operation, SimulatedCloud};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// Throttling, 5xx, network blips; the call may succeed if repeated
    #[error("Transient cloud error: {0}")]
    Transient(String),

    /// The control plane rejected the call
    #[error("Cloud error: {0}")]
    Permanent(String),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl Retryable for CloudError {
    fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Live view of a resource as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Lifecycle state, e.g. `running`, `stopped`, `available`
    pub state: String,
    #[serde(default)]
    pub configuration: Configuration,
}

impl ResourceSnapshot {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            configuration: Configuration::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.configuration.insert(key.to_string(), value.into());
        self
    }

    pub fn is_in(&self, states: &[&str]) -> bool {
        states.iter().any(|s| s.eq_ignore_ascii_case(&self.state))
    }
}

#[async_trait]
pub trait CloudControl: Send + Sync {
    async fn read_state(&self, resource_id: &str) -> CloudResult<ResourceSnapshot>;

    async fn stop(&self, resource_id: &str) -> CloudResult<()>;

    async fn start(&self, resource_id: &str) -> CloudResult<()>;

    /// Apply configuration changes; only the keys present are changed
    async fn modify(&self, resource_id: &str, changes: &Configuration) -> CloudResult<()>;
}

/// Cloud-control collaborators keyed by resource kind
#[derive(Clone, Default)]
pub struct CloudControls {
    controls: HashMap<ResourceKind, Arc<dyn CloudControl>>,
}

impl CloudControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ResourceKind, control: Arc<dyn CloudControl>) -> Self {
        self.controls.insert(kind, control);
        self
    }

    pub fn insert(&mut self, kind: ResourceKind, control: Arc<dyn CloudControl>) {
        self.controls.insert(kind, control);
    }

    pub fn for_kind(&self, kind: ResourceKind) -> Option<Arc<dyn CloudControl>> {
        self.controls.get(&kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.controls.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(CloudError::Transient("throttled".into()).is_transient());
        assert!(!CloudError::Permanent("denied".into()).is_transient());
        assert!(!CloudError::NotFound("i-1".into()).is_transient());
    }

    #[test]
    fn test_snapshot_state_match_ignores_case() {
        let snapshot = ResourceSnapshot::new("Running");
        assert!(snapshot.is_in(&["stopped", "running"]));
        assert!(!snapshot.is_in(&["stopped"]));
    }

    #[test]
    fn test_controls_lookup_by_kind() {
        let sim: Arc<dyn CloudControl> = Arc::new(SimulatedCloud::new(ResourceKind::Compute));
        let controls = CloudControls::new().with(ResourceKind::Compute, sim);
        assert!(controls.for_kind(ResourceKind::Compute).is_some());
        assert!(controls.for_kind(ResourceKind::Function).is_none());
    }
}
