use serde::{Deserialize, Serialize};

/// One logical tenant: key/secret pair plus the per-app admission policy.
///
/// Apps are immutable at runtime; a connection keeps the `App` value it was
/// admitted with for its whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub id: String,
    pub key: String,
    pub secret: String,
    pub name: String,
    pub enabled: bool,
    /// Maximum concurrent connections; `None` means unlimited.
    pub capacity: Option<u32>,
    pub client_messages_enabled: bool,
    pub statistics_enabled: bool,
    /// Allowed `Origin` hosts. Empty means any origin. Entries may carry a
    /// `*` wildcard (`*.example.com`).
    pub allowed_origins: Vec<String>,
}

impl Default for App {
    fn default() -> Self {
        Self {
            id: String::new(),
            key: String::new(),
            secret: String::new(),
            name: String::new(),
            enabled: true,
            capacity: None,
            client_messages_enabled: false,
            statistics_enabled: true,
            allowed_origins: Vec::new(),
        }
    }
}

impl App {
    /// Origin admission check. `origin` is the raw `Origin` header value;
    /// only its host is compared against the configured entries.
    pub fn origin_is_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        let Some(origin) = origin else {
            return false;
        };
        let host = match url::Url::parse(origin) {
            Ok(url) => match url.host_str() {
                Some(host) => host.to_string(),
                None => return false,
            },
            // A bare hostname without a scheme.
            Err(_) => origin.to_string(),
        };

        self.allowed_origins.iter().any(|allowed| {
            if allowed == &host {
                return true;
            }
            if allowed.contains('*') {
                let pattern = format!("^{}$", regex::escape(allowed).replace(r"\*", ".*"));
                if let Ok(re) = regex::Regex::new(&pattern) {
                    return re.is_match(&host);
                }
            }
            false
        })
    }
}
