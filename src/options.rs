use crate::app::config::App;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level broker configuration, loaded from a JSON file with every key
/// optional; CLI flags override individual fields after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub ssl: SslOptions,
    pub apps: Vec<App>,
    pub app_manager: AppManagerConfig,
    pub broadcast_socket_enabled: bool,
    pub broadcast_socket_path: String,
    pub max_request_size_kb: usize,
    pub statistics: StatisticsOptions,
    pub restart_marker_path: String,
    /// Seconds of client idle time before the server pings.
    pub activity_timeout: u64,
    /// Seconds to wait for a pong after a server-initiated ping.
    pub pong_timeout: u64,
    /// Shut down softly (drain) on INT/TERM when true.
    pub soft_shutdown: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6001,
            debug: false,
            ssl: SslOptions::default(),
            apps: Vec::new(),
            app_manager: AppManagerConfig::default(),
            broadcast_socket_enabled: true,
            broadcast_socket_path: "/tmp/beamcast-broadcast.sock".to_string(),
            max_request_size_kb: 2048,
            statistics: StatisticsOptions::default(),
            restart_marker_path: "/tmp/beamcast-restart.json".to_string(),
            activity_timeout: 30,
            pong_timeout: 10,
            soft_shutdown: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SslOptions {
    pub local_cert: Option<String>,
    pub local_pk: Option<String>,
    pub passphrase: Option<String>,
    pub verify_peer: bool,
    pub allow_self_signed: bool,
}

impl SslOptions {
    pub fn enabled(&self) -> bool {
        self.local_cert.is_some() && self.local_pk.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsOptions {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub retention_days: u32,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppManagerConfig {
    pub driver: AppManagerDriver,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppManagerDriver {
    #[default]
    Memory,
}

impl ServerOptions {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read config file {path:?}: {e}")))?;
        let options: ServerOptions = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config file {path:?}: {e}")))?;
        Ok(options)
    }

    /// Validate the configuration values
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }

        if self.max_request_size_kb == 0 {
            return Err("max_request_size_kb must be greater than 0".to_string());
        }

        if self.statistics.enabled && self.statistics.interval_seconds == 0 {
            return Err("statistics.interval_seconds must be greater than 0".to_string());
        }

        if self.broadcast_socket_enabled && self.broadcast_socket_path.is_empty() {
            return Err(
                "broadcast_socket_path must be set when the broadcast socket is enabled"
                    .to_string(),
            );
        }

        let mut seen_keys = std::collections::HashSet::new();
        for app in &self.apps {
            if app.id.is_empty() || app.key.is_empty() || app.secret.is_empty() {
                return Err(format!(
                    "app `{}` requires a non-empty id, key and secret",
                    app.id
                ));
            }
            if !seen_keys.insert(app.key.clone()) {
                return Err(format!("duplicate app key `{}`", app.key));
            }
        }

        if self.ssl.local_cert.is_some() != self.ssl.local_pk.is_some() {
            return Err("ssl requires both local_cert and local_pk".to_string());
        }

        Ok(())
    }

    pub fn max_request_size_bytes(&self) -> usize {
        self.max_request_size_kb * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = ServerOptions::default();
        assert_eq!(options.host, "0.0.0.0");
        assert_eq!(options.port, 6001);
        assert_eq!(options.max_request_size_kb, 2048);
        assert_eq!(options.broadcast_socket_path, "/tmp/beamcast-broadcast.sock");
        assert_eq!(options.activity_timeout, 30);
        assert!(options.statistics.enabled);
        assert_eq!(options.statistics.interval_seconds, 60);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let options: ServerOptions = serde_json::from_str(
            r#"{
                "port": 7001,
                "apps": [
                    {"id": "1", "key": "k", "secret": "s", "client_messages_enabled": true}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(options.port, 7001);
        assert_eq!(options.apps.len(), 1);
        assert!(options.apps[0].client_messages_enabled);
        assert_eq!(options.max_request_size_kb, 2048);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn duplicate_app_keys_fail_validation() {
        let mut options = ServerOptions::default();
        options.apps = vec![
            App {
                id: "1".into(),
                key: "same".into(),
                secret: "a".into(),
                ..Default::default()
            },
            App {
                id: "2".into(),
                key: "same".into(),
                secret: "b".into(),
                ..Default::default()
            },
        ];
        assert!(options.validate().is_err());
    }

    #[test]
    fn ssl_requires_cert_and_key_together() {
        let mut options = ServerOptions::default();
        options.ssl.local_cert = Some("/tmp/cert.pem".into());
        assert!(options.validate().is_err());
        options.ssl.local_pk = Some("/tmp/key.pem".into());
        assert!(options.validate().is_ok());
        assert!(options.ssl.enabled());
    }
}
