//! Background purge of expired executions

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ExecutionStore;

/// Periodically remove terminal executions older than `retention`
pub fn spawn_purge_task(
    store: Arc<dyn ExecutionStore>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let cutoff = Utc::now()
                .checked_sub_signed(retention)
                .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

            match store.purge_expired(cutoff).await {
                Ok(0) => debug!("No executions past retention"),
                Ok(purged) => info!("Purged {} execution(s) past retention", purged),
                Err(e) => warn!("Execution purge failed: {}", e),
            }
        }
    })
}
