use serde::{Deserialize, Serialize};

use crate::models::{Post, UserProfile};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the socket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Generic --

/// `{ "message": ... }` body used for confirmations and errors alike.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

// -- Posts --

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub post: Post,
    pub likes_count: usize,
    pub liked: bool,
}

#[derive(Debug, Serialize)]
pub struct RepostToggleResponse {
    pub message: String,
    pub reposted: bool,
}

#[derive(Debug, Serialize)]
pub struct RepostStatusResponse {
    pub reposted: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

// -- Users --

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateResponse {
    pub message: String,
    pub user: UserProfile,
    pub profile_picture: String,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message: String,
    pub updated: usize,
}
