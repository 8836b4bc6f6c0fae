pub mod auth;
pub mod comments;
pub mod error;
pub mod feed;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod state;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Headroom over the picture cap for the other form fields.
const PROFILE_BODY_LIMIT: usize = users::MAX_PICTURE_BYTES + 1024 * 1024;

/// The full REST surface under `/api`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/posts", get(posts::get_feed))
        .route("/api/posts/{id}", get(posts::get_post))
        .route("/api/posts/{id}/repost/count", get(posts::repost_count))
        .route("/api/posts/{id}/comments", get(comments::list_comments))
        .route("/api/users/{id}", get(users::get_public_profile))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/follow/{id}", post(auth::follow))
        .route("/api/auth/unfollow/{id}", post(auth::unfollow))
        .route("/api/auth/following", get(auth::following))
        .route("/api/auth/followers", get(auth::followers))
        .route("/api/posts", post(posts::create_post))
        .route("/api/posts/following", get(posts::get_following_feed))
        .route("/api/posts/{id}", delete(posts::delete_post))
        .route("/api/posts/{id}/like", post(posts::toggle_like))
        .route("/api/posts/{id}/repost", post(posts::toggle_repost))
        .route("/api/posts/{id}/repost/check", get(posts::check_repost))
        .route("/api/posts/{id}/comments", post(comments::add_comment))
        .route(
            "/api/posts/{id}/comments/{comment_id}",
            delete(comments::delete_comment),
        )
        .route(
            "/api/users/profile",
            get(users::get_profile)
                .put(users::update_profile)
                .layer(DefaultBodyLimit::max(PROFILE_BODY_LIMIT)),
        )
        .route("/api/users/conversations", get(users::list_conversations))
        .route(
            "/api/users/conversations/{id}/messages",
            get(users::get_messages),
        )
        .route(
            "/api/users/conversations/{id}/read",
            put(users::mark_conversation_read),
        )
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/read-all", put(notifications::mark_all_read))
        .route("/api/notifications/{id}/read", put(notifications::mark_read))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
