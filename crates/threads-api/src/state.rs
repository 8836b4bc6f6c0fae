use std::path::PathBuf;
use std::sync::Arc;

use threads_db::Database;
use threads_db::models::NewNotification;
use threads_gateway::dispatcher::Dispatcher;
use threads_gateway::{GatewayContext, db_task, notify};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    /// Where uploaded profile pictures are written; served at `/uploads`.
    pub uploads_dir: PathBuf,
}

impl AppStateInner {
    /// Run blocking DB work off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(db_task(&self.db, f).await?)
    }

    /// Best-effort: failures are logged inside, never surfaced.
    pub async fn notify(&self, new: NewNotification) {
        notify::notify(&self.db, &self.dispatcher, new).await;
    }

    pub fn gateway(&self) -> GatewayContext {
        GatewayContext {
            db: self.db.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}
