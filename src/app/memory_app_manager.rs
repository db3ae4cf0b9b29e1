use crate::app::config::App;
use crate::app::manager::AppManager;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;

/// In-memory `AppManager`, populated from the config file at startup.
pub struct MemoryAppManager {
    apps: DashMap<String, App, ahash::RandomState>,
}

impl MemoryAppManager {
    pub fn new() -> Self {
        Self {
            apps: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn with_apps(apps: Vec<App>) -> Self {
        let manager = Self::new();
        for app in apps {
            manager.apps.insert(app.id.clone(), app);
        }
        manager
    }
}

impl Default for MemoryAppManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppManager for MemoryAppManager {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn create_app(&self, app: App) -> Result<()> {
        if app.id.is_empty() || app.key.is_empty() {
            return Err(Error::Config(
                "App requires a non-empty id and key".to_string(),
            ));
        }
        if self.apps.contains_key(&app.id) {
            return Err(Error::Config(format!("App `{}` already exists", app.id)));
        }
        self.apps.insert(app.id.clone(), app);
        Ok(())
    }

    async fn get_apps(&self) -> Result<Vec<App>> {
        Ok(self.apps.iter().map(|e| e.value().clone()).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<App>> {
        Ok(self.apps.get(id).map(|e| e.value().clone()))
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<App>> {
        Ok(self
            .apps
            .iter()
            .find(|e| e.value().key == key)
            .map(|e| e.value().clone()))
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<App>> {
        Ok(self
            .apps
            .iter()
            .find(|e| e.value().secret == secret)
            .map(|e| e.value().clone()))
    }

    async fn check_health(&self) -> Result<()> {
        Ok(())
    }
}
