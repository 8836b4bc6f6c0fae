use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use threads_db::models::NewNotification;
use threads_types::api::{
    Claims, CountResponse, CreatePostRequest, LikeResponse, MessageResponse, RepostStatusResponse,
    RepostToggleResponse,
};
use threads_types::models::{FeedItem, NotificationKind, Post};

use crate::error::ApiError;
use crate::feed::merge_feed;
use crate::state::AppState;

pub const MAX_POST_LENGTH: usize = 500;

/// Trim and bounds-check post or comment text.
pub(crate) fn validate_content(raw: &str) -> Result<String, ApiError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("Content is required"));
    }
    if content.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Content must be {MAX_POST_LENGTH} characters or fewer"
        )));
    }
    Ok(content.to_string())
}

/// 404 unless the post exists.
pub(crate) async fn require_post(state: &AppState, post_id: i64) -> Result<Post, ApiError> {
    state
        .db(move |db| db.get_post(post_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = validate_content(&req.content)?;

    let post = state
        .db(move |db| db.create_post(claims.sub, &content))
        .await?;
    info!("User {} created post {}", claims.username, post.id);

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_feed(State(state): State<AppState>) -> Result<Json<Vec<FeedItem>>, ApiError> {
    let (posts, reposts) = state
        .db(|db| Ok((db.list_posts(None)?, db.list_reposts(None)?)))
        .await?;

    Ok(Json(merge_feed(posts, reposts)))
}

pub async fn get_following_feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<FeedItem>>, ApiError> {
    let (posts, reposts) = state
        .db(move |db| {
            Ok((
                db.list_posts(Some(claims.sub))?,
                db.list_reposts(Some(claims.sub))?,
            ))
        })
        .await?;

    Ok(Json(merge_feed(posts, reposts)))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(require_post(&state, post_id).await?))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageResponse>, ApiError> {
    let post = require_post(&state, post_id).await?;
    if post.user_id != claims.sub {
        return Err(ApiError::forbidden("You are not authorized to delete this post"));
    }

    state.db(move |db| db.delete_post(post_id)).await?;
    info!("User {} deleted post {}", claims.username, post_id);

    Ok(Json(MessageResponse::new("Post deleted successfully")))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<LikeResponse>, ApiError> {
    let post = require_post(&state, post_id).await?;
    let me = claims.sub;

    let liked = state.db(move |db| db.toggle_like(post_id, me)).await?;

    if liked && post.user_id != me {
        state
            .notify(NewNotification {
                recipient_id: post.user_id,
                sender_id: me,
                kind: NotificationKind::Like,
                post_id: Some(post_id),
                content: None,
            })
            .await;
    }

    let post = require_post(&state, post_id).await?;
    Ok(Json(LikeResponse {
        likes_count: post.likes.len(),
        liked,
        post,
    }))
}

pub async fn toggle_repost(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RepostToggleResponse>, ApiError> {
    let post = require_post(&state, post_id).await?;
    let me = claims.sub;

    let reposted = state.db(move |db| db.toggle_repost(post_id, me)).await?;

    if !reposted {
        return Ok(Json(RepostToggleResponse {
            message: "Repost removed".into(),
            reposted,
        }));
    }

    if post.user_id != me {
        state
            .notify(NewNotification {
                recipient_id: post.user_id,
                sender_id: me,
                kind: NotificationKind::Repost,
                post_id: Some(post_id),
                content: None,
            })
            .await;
    }

    Ok(Json(RepostToggleResponse {
        message: "Post reposted".into(),
        reposted,
    }))
}

pub async fn check_repost(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RepostStatusResponse>, ApiError> {
    let reposted = state
        .db(move |db| db.has_reposted(post_id, claims.sub))
        .await?;
    Ok(Json(RepostStatusResponse { reposted }))
}

pub async fn repost_count(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.db(move |db| db.repost_count(post_id)).await?;
    Ok(Json(CountResponse { count }))
}
