pub mod connection;
pub mod dispatcher;
pub mod notify;

use std::sync::Arc;

use threads_db::Database;

use crate::dispatcher::Dispatcher;

/// What a socket connection needs to serve commands.
#[derive(Clone)]
pub struct GatewayContext {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
}

/// Run blocking database work off the async runtime.
pub async fn db_task<F, T>(db: &Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
