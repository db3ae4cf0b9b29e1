use super::StatisticsSnapshot;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only counters for one app within the current flush window.
#[derive(Debug, Default)]
struct AppCounters {
    connections: AtomicU64,
    peak_connections: AtomicU64,
    new_connections: AtomicU64,
    disconnections: AtomicU64,
    ws_messages_received: AtomicU64,
    ws_messages_sent: AtomicU64,
    api_messages: AtomicU64,
}

/// Metered sink for connection and message counts. Marking is cheap and
/// lock-free; a periodic flush turns the counters into snapshots.
pub trait StatisticsCollector: Send + Sync {
    fn mark_new_connection(&self, app_id: &str);
    fn mark_disconnection(&self, app_id: &str);
    fn mark_ws_message_received(&self, app_id: &str);
    fn mark_ws_message_sent(&self, app_id: &str);
    fn mark_api_message(&self, app_id: &str);

    /// Snapshots and resets the per-window counters. Current and peak
    /// connection counts carry over into the next window.
    fn flush(&self) -> Vec<StatisticsSnapshot>;
}

#[derive(Debug, Default)]
pub struct MemoryStatisticsCollector {
    apps: DashMap<String, AppCounters, ahash::RandomState>,
}

impl MemoryStatisticsCollector {
    pub fn new() -> Self {
        Self {
            apps: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    fn with_counters<R>(&self, app_id: &str, mark: impl FnOnce(&AppCounters) -> R) -> R {
        let entry = self.apps.entry(app_id.to_string()).or_default();
        mark(entry.value())
    }
}

impl StatisticsCollector for MemoryStatisticsCollector {
    fn mark_new_connection(&self, app_id: &str) {
        self.with_counters(app_id, |counters| {
            counters.new_connections.fetch_add(1, Ordering::Relaxed);
            let current = counters.connections.fetch_add(1, Ordering::Relaxed) + 1;
            counters.peak_connections.fetch_max(current, Ordering::Relaxed);
        });
    }

    fn mark_disconnection(&self, app_id: &str) {
        self.with_counters(app_id, |counters| {
            counters.disconnections.fetch_add(1, Ordering::Relaxed);
            // Saturating decrement; a disconnect for an untracked connection
            // must not wrap.
            let _ = counters
                .connections
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                    Some(c.saturating_sub(1))
                });
        });
    }

    fn mark_ws_message_received(&self, app_id: &str) {
        self.with_counters(app_id, |counters| {
            counters.ws_messages_received.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn mark_ws_message_sent(&self, app_id: &str) {
        self.with_counters(app_id, |counters| {
            counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn mark_api_message(&self, app_id: &str) {
        self.with_counters(app_id, |counters| {
            counters.api_messages.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn flush(&self) -> Vec<StatisticsSnapshot> {
        let timestamp = Utc::now();
        let mut snapshots = Vec::with_capacity(self.apps.len());

        for entry in self.apps.iter() {
            let counters = entry.value();
            let connections = counters.connections.load(Ordering::Relaxed);
            snapshots.push(StatisticsSnapshot {
                app_id: entry.key().clone(),
                timestamp,
                peak_connections: counters.peak_connections.swap(connections, Ordering::Relaxed),
                connections,
                new_connections: counters.new_connections.swap(0, Ordering::Relaxed),
                disconnections: counters.disconnections.swap(0, Ordering::Relaxed),
                ws_messages_received: counters.ws_messages_received.swap(0, Ordering::Relaxed),
                ws_messages_sent: counters.ws_messages_sent.swap(0, Ordering::Relaxed),
                api_messages: counters.api_messages.swap(0, Ordering::Relaxed),
            });
        }

        snapshots
    }
}
