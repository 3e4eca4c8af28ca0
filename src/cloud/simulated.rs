//! In-process control plane used for dry runs and tests
//!
//! State changes settle after a configurable number of reads, so the
//! executor's polling paths are exercised the same way a real eventually
//! consistent control plane would exercise them. Faults can be injected per
//! resource and operation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{CloudControl, CloudError, CloudResult, ResourceSnapshot};
use crate::model::{Configuration, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Stop,
    Start,
    Modify,
}

#[derive(Debug)]
struct SimResource {
    snapshot: ResourceSnapshot,
    settling: Option<Settling>,
    drop_modifications: bool,
}

#[derive(Debug)]
struct Settling {
    to: String,
    reads_left: u32,
}

#[derive(Debug, Default)]
struct SimState {
    resources: HashMap<String, SimResource>,
    faults: HashMap<(String, Operation), VecDeque<CloudError>>,
    calls: VecDeque<(Operation, String)>,
}

/// Calls remembered by default; older ones are dropped first
pub const DEFAULT_CALL_LOG_LIMIT: usize = 1024;

pub struct SimulatedCloud {
    kind: ResourceKind,
    settle_reads: u32,
    call_log_limit: usize,
    state: Mutex<SimState>,
}

impl SimulatedCloud {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            settle_reads: 1,
            call_log_limit: DEFAULT_CALL_LOG_LIMIT,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Number of reads a transitional state is reported before it settles
    pub fn with_settle_reads(mut self, reads: u32) -> Self {
        self.settle_reads = reads;
        self
    }

    /// Keep at most `limit` entries in the call log
    pub fn with_call_log_limit(mut self, limit: usize) -> Self {
        self.call_log_limit = limit;
        self
    }

    pub fn with_resource(self, resource_id: &str, snapshot: ResourceSnapshot) -> Self {
        self.add_resource(resource_id, snapshot);
        self
    }

    pub fn add_resource(&self, resource_id: &str, snapshot: ResourceSnapshot) {
        self.lock().resources.insert(
            resource_id.to_string(),
            SimResource {
                snapshot,
                settling: None,
                drop_modifications: false,
            },
        );
    }

    /// Queue `times` failures for the next calls of `op` on `resource_id`
    pub fn fail(&self, resource_id: &str, op: Operation, error: CloudError, times: usize) {
        let mut state = self.lock();
        let queue = state
            .faults
            .entry((resource_id.to_string(), op))
            .or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Report modifications as successful without applying them
    pub fn drop_modifications(&self, resource_id: &str) {
        if let Some(resource) = self.lock().resources.get_mut(resource_id) {
            resource.drop_modifications = true;
        }
    }

    /// Current state without advancing any settling transition
    pub fn peek(&self, resource_id: &str) -> Option<ResourceSnapshot> {
        self.lock()
            .resources
            .get(resource_id)
            .map(|r| r.snapshot.clone())
    }

    /// Most recent calls, oldest first
    pub fn calls(&self) -> Vec<(Operation, String)> {
        self.lock().calls.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, state: &mut SimState, op: Operation, resource_id: &str) -> CloudResult<()> {
        if self.call_log_limit > 0 {
            if state.calls.len() == self.call_log_limit {
                state.calls.pop_front();
            }
            state.calls.push_back((op, resource_id.to_string()));
        }
        if let Some(error) = state
            .faults
            .get_mut(&(resource_id.to_string(), op))
            .and_then(VecDeque::pop_front)
        {
            debug!("Injected {:?} fault for {}: {}", op, resource_id, error);
            return Err(error);
        }
        if !state.resources.contains_key(resource_id) {
            return Err(CloudError::NotFound(resource_id.to_string()));
        }
        Ok(())
    }

    fn transition(&self, resource: &mut SimResource, via: &str, to: &str) {
        if self.settle_reads == 0 {
            resource.snapshot.state = to.to_string();
            resource.settling = None;
        } else {
            resource.snapshot.state = via.to_string();
            resource.settling = Some(Settling {
                to: to.to_string(),
                reads_left: self.settle_reads,
            });
        }
    }
}

#[async_trait]
impl CloudControl for SimulatedCloud {
    async fn read_state(&self, resource_id: &str) -> CloudResult<ResourceSnapshot> {
        let mut state = self.lock();
        self.begin(&mut state, Operation::Read, resource_id)?;
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| CloudError::NotFound(resource_id.to_string()))?;

        if let Some(settling) = resource.settling.as_mut() {
            if settling.reads_left == 0 {
                resource.snapshot.state = settling.to.clone();
                resource.settling = None;
            } else {
                settling.reads_left -= 1;
            }
        }

        Ok(resource.snapshot.clone())
    }

    async fn stop(&self, resource_id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        self.begin(&mut state, Operation::Stop, resource_id)?;
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| CloudError::NotFound(resource_id.to_string()))?;

        match resource.snapshot.state.as_str() {
            "stopped" | "stopping" => Ok(()),
            "running" => {
                self.transition(resource, "stopping", "stopped");
                Ok(())
            }
            other => Err(CloudError::Permanent(format!(
                "IncorrectState: cannot stop {resource_id} while {other}"
            ))),
        }
    }

    async fn start(&self, resource_id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        self.begin(&mut state, Operation::Start, resource_id)?;
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| CloudError::NotFound(resource_id.to_string()))?;

        match resource.snapshot.state.as_str() {
            "running" | "pending" => Ok(()),
            "stopped" => {
                self.transition(resource, "pending", "running");
                Ok(())
            }
            other => Err(CloudError::Permanent(format!(
                "IncorrectState: cannot start {resource_id} while {other}"
            ))),
        }
    }

    async fn modify(&self, resource_id: &str, changes: &Configuration) -> CloudResult<()> {
        let mut state = self.lock();
        self.begin(&mut state, Operation::Modify, resource_id)?;
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| CloudError::NotFound(resource_id.to_string()))?;

        if self.kind == ResourceKind::Compute && resource.snapshot.state != "stopped" {
            return Err(CloudError::Permanent(format!(
                "IncorrectInstanceState: {resource_id} must be stopped to modify"
            )));
        }

        if resource.drop_modifications {
            return Ok(());
        }

        for (key, value) in changes {
            resource
                .snapshot
                .configuration
                .insert(key.clone(), value.clone());
        }

        if matches!(
            self.kind,
            ResourceKind::RelationalDB | ResourceKind::BlockVolume
        ) {
            let settled = resource.snapshot.state.clone();
            self.transition(resource, "modifying", &settled);
        }

        Ok(())
    }
}
