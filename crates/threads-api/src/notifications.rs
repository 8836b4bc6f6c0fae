use axum::{
    Extension, Json,
    extract::{Path, State},
};

use threads_types::api::{Claims, MessageResponse};
use threads_types::models::Notification;

use crate::error::ApiError;
use crate::state::AppState;

const LIST_LIMIT: u32 = 50;

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notifications = state
        .db(move |db| db.list_notifications(claims.sub, LIST_LIMIT))
        .await?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Notification>, ApiError> {
    let notification = state
        .db(move |db| db.mark_notification_read(notification_id, claims.sub))
        .await?
        .ok_or_else(|| ApiError::not_found("Notification not found"))?;
    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .db(move |db| db.mark_all_notifications_read(claims.sub))
        .await?;
    Ok(Json(MessageResponse::new("All notifications marked as read")))
}
