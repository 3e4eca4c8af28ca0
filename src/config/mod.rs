use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub mod loader;

pub use loader::load_config;

use crate::retry::{BackoffStrategy, RetryConfig};

/// Data directory used when the file store has no explicit path
pub fn get_data_dir() -> Result<PathBuf> {
    ProjectDirs::from("dev", "costguard", "costguard")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log filter directive, e.g. `info` or `costguard=debug`
    pub log_level: Option<String>,
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub executor: ExecutorConfig,
    pub store: StoreConfig,
    pub policy: PolicyConfig,
    pub advisor: AdvisorConfig,
    pub cloud: CloudConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Gateway ceiling for one request; dispatch answers 504 past it
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(29),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    /// Executions run at the same time by the worker
    pub max_concurrent_executions: usize,
    /// Retry policy for handing an accepted execution to the queue
    pub handoff_retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent_executions: 4,
            handoff_retry: RetryConfig {
                attempts: 3,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(500),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Resources of one execution remediated at the same time
    pub max_concurrent_resources: usize,
    /// Hard ceiling for one resource's whole sequence
    #[serde(with = "humantime_serde")]
    pub resource_timeout: Duration,
    /// Wall-clock budget for a whole execution
    #[serde(with = "humantime_serde")]
    pub execution_budget: Duration,
    /// Ceiling for a single wait-for-state poll loop
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    /// Delay schedule between state polls
    pub poll: RetryConfig,
    /// Retry policy for transient cloud-control errors
    pub cloud_retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_resources: 8,
            resource_timeout: Duration::from_secs(15 * 60),
            execution_budget: Duration::from_secs(60 * 60),
            wait_timeout: Duration::from_secs(10 * 60),
            poll: RetryConfig {
                attempts: u32::MAX,
                backoff: BackoffStrategy::Exponential { base: 2.0 },
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                jitter: true,
                ..Default::default()
            },
            cloud_retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: Option<PathBuf>,
    /// How long terminal executions stay queryable
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            retention: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Rule table file; the built-in table is used when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub endpoint: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudMode {
    #[default]
    Simulated,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub mode: CloudMode,
    pub endpoint: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            mode: CloudMode::Simulated,
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Bearer token to caller identity
    pub tokens: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn merge_env_vars(&mut self) {
        if let Ok(bind) = std::env::var("COSTGUARD_BIND") {
            self.server.bind = bind;
        }

        if let Ok(log_level) = std::env::var("COSTGUARD_LOG_LEVEL") {
            self.log_level = Some(log_level);
        }

        if let Ok(endpoint) = std::env::var("COSTGUARD_ADVISOR_ENDPOINT") {
            self.advisor.endpoint = Some(endpoint);
        }

        if let Ok(endpoint) = std::env::var("COSTGUARD_CLOUD_ENDPOINT") {
            self.cloud.endpoint = Some(endpoint);
            self.cloud.mode = CloudMode::Http;
        }

        if let Ok(path) = std::env::var("COSTGUARD_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
            self.store.backend = StoreBackend::File;
        }

        if let Ok(path) = std::env::var("COSTGUARD_POLICY_PATH") {
            self.policy.path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.queue_capacity == 0 {
            return Err(anyhow!("dispatch.queue_capacity must be greater than 0"));
        }
        if self.dispatch.max_concurrent_executions == 0 {
            return Err(anyhow!(
                "dispatch.max_concurrent_executions must be greater than 0"
            ));
        }
        if self.dispatch.handoff_retry.attempts == 0 {
            return Err(anyhow!("dispatch.handoff_retry.attempts must be greater than 0"));
        }
        if self.executor.max_concurrent_resources == 0 {
            return Err(anyhow!(
                "executor.max_concurrent_resources must be greater than 0"
            ));
        }
        if self.executor.cloud_retry.attempts == 0 {
            return Err(anyhow!("executor.cloud_retry.attempts must be greater than 0"));
        }
        self.dispatch.handoff_retry.validate("dispatch.handoff_retry")?;
        self.executor.poll.validate("executor.poll")?;
        self.executor.cloud_retry.validate("executor.cloud_retry")?;
        if self.store.backend == StoreBackend::File && self.store.path.is_none() {
            return Err(anyhow!("store.path is required for the file backend"));
        }
        if self.cloud.mode == CloudMode::Http && self.cloud.endpoint.is_none() {
            return Err(anyhow!("cloud.endpoint is required in http mode"));
        }
        if self.auth.enabled && self.auth.tokens.is_empty() {
            return Err(anyhow!("auth.enabled requires at least one token"));
        }
        Ok(())
    }
}
