use std::sync::Arc;

use eventify_db::Database;
use eventify_gateway::Dispatcher;

use crate::error::ApiResult;
use crate::media::MediaStore;
use crate::notify::Notifier;
use crate::payments::gateway::PaymentGateway;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub allow_admin_signup: bool,
    pub dispatcher: Dispatcher,
    pub notifier: Notifier,
    pub payments: Arc<dyn PaymentGateway>,
    pub webhook_secret: Option<String>,
    pub currency: String,
    pub frontend_url: String,
    pub media: Arc<dyn MediaStore>,
}

impl AppStateInner {
    /// Run a database call on the blocking pool.
    pub async fn db<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db)).await?;
        Ok(result?)
    }
}
