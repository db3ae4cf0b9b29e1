use crate::error::{Error, Result};
use crate::protocol::constants::RESTART_CHECK_INTERVAL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Durable restart rendezvous shared between broker processes and the
/// restart CLI command: a change of `time` tells every watcher to shut
/// down, `soft` selects drain versus hard stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartMarker {
    pub time: u64,
    pub soft: bool,
}

pub fn read_marker(path: &Path) -> Result<Option<RestartMarker>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let marker = serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("Invalid restart marker: {e}")))?;
            Ok(Some(marker))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Stamps the marker with the current wall-clock time; running brokers
/// pick the transition up on their next periodic check.
pub fn write_marker(path: &Path, soft: bool) -> Result<RestartMarker> {
    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Internal(format!("System clock before epoch: {e}")))?
        .as_secs();
    let marker = RestartMarker { time, soft };
    std::fs::write(path, serde_json::to_string(&marker)?)?;
    Ok(marker)
}

/// Polls the marker and resolves when its `time` moves past the value
/// observed at boot.
pub struct RestartWatcher {
    path: PathBuf,
    baseline: Option<u64>,
    interval: Duration,
}

impl RestartWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let baseline = match read_marker(&path) {
            Ok(marker) => marker.map(|m| m.time),
            Err(e) => {
                warn!("Cannot read restart marker at boot: {}", e);
                None
            }
        };
        Self {
            path,
            baseline,
            interval: Duration::from_secs(RESTART_CHECK_INTERVAL),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn wait_for_restart(self) -> RestartMarker {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match read_marker(&self.path) {
                Ok(Some(marker)) if Some(marker.time) != self.baseline => {
                    info!(
                        "Restart marker changed (soft={}), initiating shutdown",
                        marker.soft
                    );
                    return marker;
                }
                Ok(_) => {}
                Err(e) => warn!("Cannot read restart marker: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_marker_path() -> PathBuf {
        std::env::temp_dir().join(format!("beamcast-restart-test-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn marker_roundtrips_through_the_file() {
        let path = temp_marker_path();
        assert_eq!(read_marker(&path).unwrap(), None);

        let written = write_marker(&path, true).unwrap();
        let read = read_marker(&path).unwrap().unwrap();
        assert_eq!(written, read);
        assert!(read.soft);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn watcher_fires_on_time_transition() {
        let path = temp_marker_path();
        write_marker(&path, false).unwrap();

        let watcher = RestartWatcher::new(&path).with_interval(Duration::from_millis(20));
        let waiting = tokio::spawn(watcher.wait_for_restart());

        // Same time value: no fire yet.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!waiting.is_finished());

        // Force a different timestamp.
        let marker = RestartMarker {
            time: u64::MAX,
            soft: true,
        };
        std::fs::write(&path, serde_json::to_string(&marker).unwrap()).unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("watcher should fire")
            .unwrap();
        assert!(fired.soft);

        std::fs::remove_file(&path).unwrap();
    }
}
