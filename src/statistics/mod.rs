pub mod collector;
pub mod store;

pub use collector::{MemoryStatisticsCollector, StatisticsCollector};
pub use store::{MemoryStatisticsStore, StatisticsStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// One flushed statistics window for one app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub app_id: String,
    pub timestamp: DateTime<Utc>,
    pub peak_connections: u64,
    pub connections: u64,
    pub new_connections: u64,
    pub disconnections: u64,
    pub ws_messages_received: u64,
    pub ws_messages_sent: u64,
    pub api_messages: u64,
}

/// Periodic flush of the collector into the store. Runs until the task is
/// aborted at shutdown; pruning rides along on every flush.
pub async fn run_flush_loop(
    collector: Arc<dyn StatisticsCollector>,
    store: Arc<dyn StatisticsStore>,
    interval_seconds: u64,
    retention_days: u32,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the first window is full.
    interval.tick().await;

    loop {
        interval.tick().await;
        let snapshots = collector.flush();
        if snapshots.is_empty() {
            continue;
        }
        debug!("Flushing {} statistics windows", snapshots.len());
        if let Err(e) = store.append(snapshots).await {
            error!("Failed to persist statistics: {}", e);
        }
        if let Err(e) = store.prune(retention_days).await {
            error!("Failed to prune statistics: {}", e);
        }
    }
}
