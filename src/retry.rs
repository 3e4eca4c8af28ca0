//! Retry strategies with configurable backoff
//!
//! Shared by the dispatcher's handoff, transient cloud-control errors, and
//! state polling in the executor. Only errors that report themselves as
//! transient are retried.

use anyhow::anyhow;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Errors that know whether repeating the operation may succeed
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Retry configuration with backoff strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Backoff strategy
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Initial delay between retries
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Add jitter to delays
    #[serde(default)]
    pub jitter: bool,

    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: BackoffStrategy::default(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter: false,
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Backoff strategies for retry delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase in delay
    Linear {
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Exponential increase in delay
    Exponential {
        #[serde(default = "default_exponential_base")]
        base: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: default_exponential_base(),
        }
    }
}

impl RetryConfig {
    /// Reject settings the delay arithmetic cannot honour
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if !self.jitter_factor.is_finite() || !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow!(
                "{name}.jitter_factor must be between 0.0 and 1.0, got {}",
                self.jitter_factor
            ));
        }
        if let BackoffStrategy::Exponential { base } = self.backoff {
            if !base.is_finite() || base < 1.0 {
                return Err(anyhow!(
                    "{name}.backoff.base must be a finite number of at least 1.0, got {base}"
                ));
            }
        }
        if self.initial_delay > self.max_delay {
            return Err(anyhow!(
                "{name}.initial_delay ({:?}) exceeds {name}.max_delay ({:?})",
                self.initial_delay,
                self.max_delay
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match &self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear { increment } => {
                self.initial_delay
                    .saturating_add(increment.saturating_mul(attempt - 1))
            }
            BackoffStrategy::Exponential { base } => {
                let multiplier = base.powi(attempt.min(i32::MAX as u32) as i32 - 1);
                let secs = self.initial_delay.as_secs_f64() * multiplier;
                if secs.is_finite() {
                    Duration::try_from_secs_f64(secs.clamp(0.0, self.max_delay.as_secs_f64()))
                        .unwrap_or(self.max_delay)
                } else {
                    self.max_delay
                }
            }
        };

        base_delay.min(self.max_delay)
    }

    /// Apply jitter to a delay
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }

        let factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jitter_range = delay.as_secs_f64() * factor;
        if jitter_range <= 0.0 {
            return delay;
        }
        let jitter = rand::rng().random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::try_from_secs_f64((delay.as_secs_f64() + jitter).max(0.0)).unwrap_or(delay)
    }
}

/// Runs operations under a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation, retrying transient failures.
    ///
    /// Returns the last error once attempts are exhausted or on the first
    /// non-transient error.
    pub async fn execute_with_retry<F, Fut, T, E>(&self, mut operation: F, context: &str) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_transient() || attempt >= self.config.attempts {
                        debug!(
                            "Giving up on {} after {} attempt(s): {}",
                            context, attempt, err
                        );
                        return Err(err);
                    }

                    let delay = self.config.apply_jitter(self.config.delay_for(attempt));
                    info!(
                        "Retrying {} (attempt {}/{}) after {:?}: {}",
                        context, attempt, self.config.attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// Default functions for serde
fn default_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_exponential_base() -> f64 {
    2.0
}
