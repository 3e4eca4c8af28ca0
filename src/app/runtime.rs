//! Service assembly from configuration

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::advisor::{Advisor, HttpAdvisor};
use crate::auth::StaticTokenVerifier;
use crate::cloud::{CloudControl, CloudControls, HttpCloudControl, SimulatedCloud};
use crate::config::{CloudMode, Config, StoreBackend};
use crate::dispatch::{self, ChannelQueue, Dispatcher};
use crate::executor::Executor;
use crate::model::ResourceKind;
use crate::policy::{PolicyEngine, PolicyTable};
use crate::retry::RetryExecutor;
use crate::server::AppState;
use crate::store::{spawn_purge_task, ExecutionStore, FileStore, MemoryStore};

/// Running service components
pub struct Services {
    pub state: Arc<AppState>,
    pub executor: Executor,
    pub policy: Arc<PolicyEngine>,
    pub worker: JoinHandle<()>,
    pub purge: JoinHandle<()>,
}

impl Services {
    /// Stop background tasks that never finish on their own
    pub fn shutdown(self) {
        self.purge.abort();
        self.worker.abort();
    }
}

pub async fn build_store(config: &Config) -> Result<Arc<dyn ExecutionStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => {
            let path = config
                .store
                .path
                .clone()
                .ok_or_else(|| anyhow!("store.path is required for the file backend"))?;
            let store = FileStore::new(&path)
                .await
                .with_context(|| format!("Failed to open execution store at {}", path.display()))?;
            info!("Executions are stored in {}", path.display());
            Ok(Arc::new(store))
        }
    }
}

pub fn load_policy(config: &Config) -> Result<PolicyTable> {
    match &config.policy.path {
        Some(path) => PolicyTable::load(path)
            .with_context(|| format!("Failed to load policy table {}", path.display())),
        None => Ok(PolicyTable::builtin()),
    }
}

pub fn build_cloud_controls(config: &Config) -> Result<CloudControls> {
    let mut controls = CloudControls::new();
    for kind in ResourceKind::ALL {
        let control: Arc<dyn CloudControl> = match config.cloud.mode {
            CloudMode::Simulated => Arc::new(SimulatedCloud::new(kind)),
            CloudMode::Http => {
                let endpoint = config
                    .cloud
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow!("cloud.endpoint is required in http mode"))?;
                Arc::new(HttpCloudControl::new(endpoint, kind, config.cloud.timeout)?)
            }
        };
        controls.insert(kind, control);
    }

    if config.cloud.mode == CloudMode::Simulated {
        warn!("Using the simulated cloud; no real resources will be modified");
    }
    Ok(controls)
}

/// Build every component, recover leftover executions and start the
/// background worker and purge tasks.
pub async fn build_services(config: &Config) -> Result<Services> {
    let store = build_store(config).await?;

    let table = load_policy(config)?;
    info!("Loaded policy table version {} ({} rules)", table.version(), table.len());
    let policy = Arc::new(PolicyEngine::new(table));

    let executor = Executor::new(
        store.clone(),
        build_cloud_controls(config)?,
        config.executor.clone(),
    );

    let (queue, receiver) = ChannelQueue::new(config.dispatch.queue_capacity);
    let queue = Arc::new(queue);
    let worker = dispatch::spawn_worker(
        executor.clone(),
        receiver,
        config.dispatch.max_concurrent_executions,
    );

    let handoff = RetryExecutor::new(config.dispatch.handoff_retry.clone());
    dispatch::recover(store.as_ref(), queue.as_ref(), &handoff).await?;

    let purge = spawn_purge_task(
        store.clone(),
        config.store.retention,
        config.store.purge_interval,
    );

    let dispatcher = Arc::new(Dispatcher::new(
        policy.clone(),
        store.clone(),
        queue,
        config.dispatch.handoff_retry.clone(),
    ));

    let advisor: Option<Arc<dyn Advisor>> = match &config.advisor.endpoint {
        Some(endpoint) => Some(Arc::new(HttpAdvisor::new(endpoint.as_str(), config.advisor.timeout)?)),
        None => {
            warn!("No advisor endpoint configured; /v1/chat will answer 502");
            None
        }
    };

    let state = Arc::new(AppState {
        dispatcher,
        store,
        advisor,
        verifier: Arc::new(StaticTokenVerifier::from_config(&config.auth)),
        request_timeout: config.server.request_timeout,
    });

    Ok(Services {
        state,
        executor,
        policy,
        worker,
        purge,
    })
}
