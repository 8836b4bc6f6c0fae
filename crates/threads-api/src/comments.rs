use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use threads_db::models::NewNotification;
use threads_types::api::{Claims, CreateCommentRequest, MessageResponse};
use threads_types::models::{Comment, NotificationKind};

use crate::error::ApiError;
use crate::posts::{require_post, validate_content};
use crate::state::AppState;

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    require_post(&state, post_id).await?;
    let comments = state.db(move |db| db.list_comments(post_id)).await?;
    Ok(Json(comments))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = validate_content(&req.content)?;
    let post = require_post(&state, post_id).await?;
    let me = claims.sub;

    let comment = state
        .db(move |db| db.create_comment(post_id, me, &content))
        .await?;

    if post.user_id != me {
        state
            .notify(NewNotification {
                recipient_id: post.user_id,
                sender_id: me,
                kind: NotificationKind::Comment,
                post_id: Some(post_id),
                content: Some(comment.content.clone()),
            })
            .await;
    }

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path((post_id, comment_id)): Path<(i64, i64)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageResponse>, ApiError> {
    let post = require_post(&state, post_id).await?;

    let comment = state
        .db(move |db| db.get_comment(comment_id))
        .await?
        .filter(|c| c.post_id == post_id)
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    // The commenter or the post's author may remove it.
    if comment.user_id != claims.sub && post.user_id != claims.sub {
        return Err(ApiError::forbidden("You are not authorized to delete this comment"));
    }

    state.db(move |db| db.delete_comment(comment_id)).await?;

    Ok(Json(MessageResponse::new("Comment deleted successfully")))
}
