use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::info;

use threads_db::is_constraint_violation;
use threads_db::models::{NewNotification, NewUser};
use threads_types::api::{Claims, LoginRequest, LoginResponse, MessageResponse, RegisterRequest};
use threads_types::models::{NotificationKind, UserSummary};

use crate::error::ApiError;
use crate::state::AppState;

/// Tokens live for a week; there is no refresh.
const TOKEN_TTL_DAYS: i64 = 7;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Username, email and password are required"));
    }

    // Hash password with Argon2id
    let password_hash = hash_password(&req.password)?;
    let bio = req.bio.unwrap_or_default();
    let profile_picture = req.profile_picture.unwrap_or_default();

    let created = state
        .db(move |db| {
            if db.find_user_by_email_or_username(&email, &username)?.is_some() {
                return Ok(None);
            }
            let inserted = db.create_user(&NewUser {
                username: &username,
                email: &email,
                password_hash: &password_hash,
                bio: &bio,
                profile_picture: &profile_picture,
            });
            match inserted {
                Ok(id) => Ok(Some((id, username))),
                // Lost a race with a concurrent registration.
                Err(e) if is_constraint_violation(&e) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;

    let (user_id, username) = created.ok_or_else(|| ApiError::bad_request("User already exists"))?;
    info!("Registered user {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User registered successfully")),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = req.email.trim().to_string();
    let user = state
        .db(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid credentials"))?;

    if !verify_password(&req.password, &user.password)? {
        return Err(ApiError::bad_request("Invalid credentials"));
    }

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(LoginResponse {
        token,
        user: user.profile(),
    }))
}

pub async fn follow(
    State(state): State<AppState>,
    Path(target_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageResponse>, ApiError> {
    if target_id == claims.sub {
        return Err(ApiError::bad_request("You cannot follow yourself"));
    }
    let me = claims.sub;

    let created = state
        .db(move |db| match db.get_user_by_id(target_id)? {
            Some(_) => Ok(Some(db.follow(me, target_id)?)),
            None => Ok(None),
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if created {
        state
            .notify(NewNotification {
                recipient_id: target_id,
                sender_id: me,
                kind: NotificationKind::Follow,
                post_id: None,
                content: None,
            })
            .await;
    }

    Ok(Json(MessageResponse::new("Followed successfully")))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(target_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageResponse>, ApiError> {
    let me = claims.sub;

    state
        .db(move |db| match db.get_user_by_id(target_id)? {
            Some(_) => Ok(Some(db.unfollow(me, target_id)?)),
            None => Ok(None),
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(MessageResponse::new("Unfollowed successfully")))
}

pub async fn following(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let rows = state.db(move |db| db.get_following(claims.sub)).await?;
    Ok(Json(rows.iter().map(|u| u.summary()).collect()))
}

pub async fn followers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let rows = state.db(move |db| db.get_followers(claims.sub)).await?;
    Ok(Json(rows.iter().map(|u| u.summary()).collect()))
}

pub fn create_token(secret: &str, user_id: i64, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub(crate) fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hashing password: {e}"))?;
    Ok(hash.to_string())
}

/// `Ok(false)` on a mismatch; a malformed stored hash is an internal error.
pub(crate) fn verify_password(password: &str, stored: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(stored).map_err(|e| anyhow::anyhow!("stored hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
