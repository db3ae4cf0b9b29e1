use super::StatisticsSnapshot;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

/// Append-only persistence for flushed statistics windows.
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    async fn append(&self, snapshots: Vec<StatisticsSnapshot>) -> Result<()>;

    /// Drops windows older than the retention horizon.
    async fn prune(&self, retention_days: u32) -> Result<()>;

    async fn query(&self, app_id: &str) -> Result<Vec<StatisticsSnapshot>>;
}

/// Keeps flushed windows in memory; sufficient for single-node deployments
/// and for tests. A database-backed store can replace it behind the trait.
#[derive(Default)]
pub struct MemoryStatisticsStore {
    windows: Mutex<Vec<StatisticsSnapshot>>,
}

impl MemoryStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatisticsStore for MemoryStatisticsStore {
    async fn append(&self, snapshots: Vec<StatisticsSnapshot>) -> Result<()> {
        self.windows.lock().await.extend(snapshots);
        Ok(())
    }

    async fn prune(&self, retention_days: u32) -> Result<()> {
        let horizon = Utc::now() - Duration::days(retention_days as i64);
        self.windows.lock().await.retain(|s| s.timestamp >= horizon);
        Ok(())
    }

    async fn query(&self, app_id: &str) -> Result<Vec<StatisticsSnapshot>> {
        Ok(self
            .windows
            .lock()
            .await
            .iter()
            .filter(|s| s.app_id == app_id)
            .cloned()
            .collect())
    }
}
