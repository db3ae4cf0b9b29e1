use crate::app::config::App;
use crate::error::Result;
use async_trait::async_trait;

/// Read-mostly registry of apps. Backends are swappable; the broker only
/// ever reads, creation is an out-of-band operation.
#[async_trait]
pub trait AppManager: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn create_app(&self, app: App) -> Result<()>;

    async fn get_apps(&self) -> Result<Vec<App>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<App>>;

    /// `Ok(None)` here is the `UnknownAppKey` signal during admission.
    async fn find_by_key(&self, key: &str) -> Result<Option<App>>;

    async fn find_by_secret(&self, secret: &str) -> Result<Option<App>>;

    async fn check_health(&self) -> Result<()>;
}
