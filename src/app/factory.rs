// src/app/factory.rs
use crate::app::config::App;
use crate::app::manager::AppManager;
use crate::app::memory_app_manager::MemoryAppManager;
use crate::error::Result;

use crate::options::{AppManagerConfig, AppManagerDriver};
use std::sync::Arc;
use tracing::info;

pub struct AppManagerFactory;

impl AppManagerFactory {
    /// Builds the configured `AppManager` backend and seeds it with the
    /// statically configured apps.
    pub async fn create(
        config: &AppManagerConfig,
        apps: &[App],
    ) -> Result<Arc<dyn AppManager + Send + Sync>> {
        info!("Initializing AppManager with driver: {:?}", config.driver);
        let manager: Arc<dyn AppManager + Send + Sync> = match config.driver {
            AppManagerDriver::Memory => Arc::new(MemoryAppManager::new()),
        };

        manager.init().await?;
        for app in apps {
            manager.create_app(app.clone()).await?;
        }

        Ok(manager)
    }
}
