//! Bounded polling for a resource to reach a target state

use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::cancel::{CancelCause, CancelToken};
use crate::cloud::{CloudControl, CloudError, ResourceSnapshot};
use crate::retry::{RetryConfig, RetryExecutor};

#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Delay schedule between polls; `attempts` is ignored
    pub poll: RetryConfig,
    /// Give up after this long
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("still '{last_state}' after {waited:?}, expected one of {expected:?}")]
    Timeout {
        last_state: String,
        expected: Vec<String>,
        waited: Duration,
    },

    #[error("wait interrupted: {0:?}")]
    Cancelled(CancelCause),
}

/// Poll `read_state` until the resource is in one of `targets`.
///
/// Transient read failures are retried by `retry`; the delay between polls
/// grows per `policy.poll` and never overshoots the deadline.
pub async fn wait_for_state(
    control: &dyn CloudControl,
    resource_id: &str,
    targets: &[&str],
    policy: &WaitPolicy,
    retry: &RetryExecutor,
    cancel: &CancelToken,
) -> Result<ResourceSnapshot, WaitError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let context = format!("read state of {resource_id}");
    let mut attempt = 0;

    loop {
        if let Some(cause) = cancel.cause() {
            return Err(WaitError::Cancelled(cause));
        }

        let snapshot = tokio::select! {
            read = retry.execute_with_retry(|| control.read_state(resource_id), &context) => read?,
            cause = cancel.cancelled() => return Err(WaitError::Cancelled(cause)),
        };
        if snapshot.is_in(targets) {
            debug!(
                "{} reached '{}' after {} poll(s)",
                resource_id,
                snapshot.state,
                attempt + 1
            );
            return Ok(snapshot);
        }

        attempt += 1;
        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Timeout {
                last_state: snapshot.state,
                expected: targets.iter().map(|s| s.to_string()).collect(),
                waited: now - started,
            });
        }

        let delay = policy
            .poll
            .apply_jitter(policy.poll.delay_for(attempt))
            .min(deadline - now);
        debug!(
            "{} is '{}', polling again in {:?}",
            resource_id, snapshot.state, delay
        );

        tokio::select! {
            _ = sleep(delay) => {}
            cause = cancel.cancelled() => return Err(WaitError::Cancelled(cause)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Operation, SimulatedCloud};
    use crate::executor::cancel::CancelSignal;
    use crate::model::ResourceKind;

    fn policy(timeout: Duration) -> WaitPolicy {
        WaitPolicy {
            poll: RetryConfig {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
                ..Default::default()
            },
            timeout,
        }
    }

    fn retry() -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_state_settles() {
        let cloud = SimulatedCloud::new(ResourceKind::Compute)
            .with_settle_reads(3)
            .with_resource("i-1", ResourceSnapshot::new("running"));
        cloud.stop("i-1").await.unwrap();

        let snapshot = wait_for_state(
            &cloud,
            "i-1",
            &["stopped"],
            &policy(Duration::from_secs(60)),
            &retry(),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(snapshot.state, "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_state_never_arrives() {
        let cloud = SimulatedCloud::new(ResourceKind::Compute)
            .with_resource("i-1", ResourceSnapshot::new("running"));

        let err = wait_for_state(
            &cloud,
            "i-1",
            &["stopped"],
            &policy(Duration::from_secs(10)),
            &retry(),
            &CancelToken::never(),
        )
        .await
        .unwrap_err();

        match err {
            WaitError::Timeout {
                last_state, waited, ..
            } => {
                assert_eq!(last_state, "running");
                assert!(waited >= Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_read_errors_are_retried() {
        let cloud = SimulatedCloud::new(ResourceKind::RelationalDB)
            .with_resource("db-1", ResourceSnapshot::new("available"));
        cloud.fail(
            "db-1",
            Operation::Read,
            CloudError::Transient("throttled".into()),
            2,
        );

        let snapshot = wait_for_state(
            &cloud,
            "db-1",
            &["available"],
            &policy(Duration::from_secs(60)),
            &retry(),
            &CancelToken::never(),
        )
        .await
        .unwrap();
        assert_eq!(snapshot.state, "available");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let cloud = SimulatedCloud::new(ResourceKind::Compute)
            .with_resource("i-1", ResourceSnapshot::new("running"));
        let (signal, token) = CancelSignal::new();

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            signal.cancel(CancelCause::Requested);
        });

        let err = wait_for_state(
            &cloud,
            "i-1",
            &["stopped"],
            &policy(Duration::from_secs(3600)),
            &retry(),
            &token,
        )
        .await
        .unwrap_err();

        canceller.await.unwrap();
        assert!(matches!(err, WaitError::Cancelled(CancelCause::Requested)));
    }
}
