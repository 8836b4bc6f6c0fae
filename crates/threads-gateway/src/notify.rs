use std::sync::Arc;

use tracing::{debug, warn};

use threads_db::Database;
use threads_db::models::NewNotification;
use threads_types::events::GatewayEvent;
use threads_types::models::Notification;

use crate::db_task;
use crate::dispatcher::Dispatcher;

/// Store a notification and push it to the recipient's live sockets.
///
/// Notifications ride along with the action that caused them, so a failure
/// here is logged and swallowed rather than failing that action.
pub async fn notify(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    new: NewNotification,
) -> Option<Notification> {
    let kind = new.kind;
    let recipient_id = new.recipient_id;

    match db_task(db, move |db| db.create_notification(&new)).await {
        Ok(notification) => {
            let delivered = dispatcher
                .send_to_user(recipient_id, GatewayEvent::NewNotification(notification.clone()))
                .await;
            debug!("{} notification for user {} pushed to {} sockets", kind, recipient_id, delivered);
            Some(notification)
        }
        Err(e) => {
            warn!("Error creating {} notification for user {}: {}", kind, recipient_id, e);
            None
        }
    }
}
