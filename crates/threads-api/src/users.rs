use std::path::Path as FsPath;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
};
use tracing::{info, warn};
use uuid::Uuid;

use threads_db::is_constraint_violation;
use threads_db::models::ProfileChanges;
use threads_types::api::{Claims, MarkReadResponse, ProfileResponse, ProfileUpdateResponse};
use threads_types::models::{Conversation, Message, PublicProfile};

use crate::auth::{hash_password, verify_password};
use crate::error::ApiError;
use crate::state::AppState;

pub const MAX_PICTURE_BYTES: usize = 5 * 1024 * 1024;

/// URL prefix the server mounts the uploads directory under.
pub const UPLOADS_ROUTE: &str = "/uploads";

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .db(move |db| db.get_user_by_id(claims.sub))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(ProfileResponse { user: user.profile() }))
}

pub async fn get_public_profile(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<PublicProfile>, ApiError> {
    let (user, (follower_count, following_count)) = state
        .db(move |db| match db.get_user_by_id(user_id)? {
            Some(user) => Ok(Some((user, db.follow_counts(user_id)?))),
            None => Ok(None),
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(PublicProfile {
        id: user.id,
        username: user.username,
        bio: user.bio,
        profile_picture: user.profile_picture,
        created_at: user.created_at,
        follower_count,
        following_count,
    }))
}

/// Text fields plus the optional picture pulled out of the multipart body.
#[derive(Default)]
struct ProfileForm {
    username: Option<String>,
    bio: Option<String>,
    current_password: Option<String>,
    new_password: Option<String>,
    picture: Option<Upload>,
}

struct Upload {
    extension: String,
    bytes: axum::body::Bytes,
}

async fn read_profile_form(mut multipart: Multipart) -> Result<ProfileForm, ApiError> {
    let mut form = ProfileForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => form.username = Some(field.text().await?),
            "bio" => form.bio = Some(field.text().await?),
            "currentPassword" => form.current_password = Some(field.text().await?),
            "newPassword" => form.new_password = Some(field.text().await?),
            "profilePicture" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !content_type.starts_with("image/") {
                    return Err(ApiError::bad_request("Only image files are allowed"));
                }
                let extension = picture_extension(field.file_name(), &content_type);
                let bytes = field.bytes().await?;
                if bytes.len() > MAX_PICTURE_BYTES {
                    return Err(ApiError::bad_request("Profile picture must be 5 MB or smaller"));
                }
                // Browsers send an empty part when no file was chosen.
                if !bytes.is_empty() {
                    form.picture = Some(Upload { extension, bytes });
                }
            }
            other => warn!("Ignoring unknown profile field '{}'", other),
        }
    }

    Ok(form)
}

/// File extension from the upload's name, falling back to the MIME subtype.
fn picture_extension(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| FsPath::new(name).extension())
        .and_then(|ext| ext.to_str());
    let from_mime = content_type.strip_prefix("image/");

    from_name
        .or(from_mime)
        .map(|ext| {
            ext.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(8)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "img".to_string())
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<Json<ProfileUpdateResponse>, ApiError> {
    let form = read_profile_form(multipart).await?;
    let me = claims.sub;

    let user = state
        .db(move |db| db.get_user_by_id(me))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let mut changes = ProfileChanges::default();

    let new_username = form
        .username
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty() && *u != user.username);
    if let Some(username) = new_username {
        let lookup = username.clone();
        if state.db(move |db| db.get_user_by_username(&lookup)).await?.is_some() {
            return Err(ApiError::bad_request("Username is already taken"));
        }
        changes.username = Some(username);
    }

    changes.bio = form.bio;

    if let Some(new_password) = form.new_password.filter(|p| !p.is_empty()) {
        let current = form
            .current_password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ApiError::bad_request("Current password is required to change password"))?;
        if !verify_password(&current, &user.password)? {
            return Err(ApiError::bad_request("Current password is incorrect"));
        }
        changes.password_hash = Some(hash_password(&new_password)?);
    }

    if let Some(upload) = form.picture {
        changes.profile_picture = Some(store_picture(&state, upload).await?);
    }

    let replaced_picture = changes
        .profile_picture
        .as_ref()
        .map(|_| user.profile_picture.clone());

    let stored_picture = changes.profile_picture.clone();
    let updated = state
        .db(move |db| match db.update_user(me, &changes) {
            Ok(row) => Ok(Ok(row)),
            // Someone claimed the name after the check above.
            Err(e) if is_constraint_violation(&e) => Ok(Err(ApiError::bad_request(
                "Username is already taken",
            ))),
            Err(e) => Err(e),
        })
        .await?;
    let updated = match updated {
        Ok(row) => row.ok_or_else(|| ApiError::not_found("User not found"))?,
        Err(e) => {
            if let Some(url) = stored_picture {
                remove_local_picture(&state, &url).await;
            }
            return Err(e);
        }
    };

    if let Some(old) = replaced_picture {
        remove_local_picture(&state, &old).await;
    }

    info!("User {} updated their profile", updated.username);

    Ok(Json(ProfileUpdateResponse {
        message: "Profile updated successfully".into(),
        profile_picture: updated.profile_picture.clone(),
        user: updated.profile(),
    }))
}

/// Write the upload as `profile-<uuid>.<ext>` and return its public URL.
async fn store_picture(state: &AppState, upload: Upload) -> Result<String, ApiError> {
    let file_name = format!("profile-{}.{}", Uuid::new_v4(), upload.extension);

    tokio::fs::create_dir_all(&state.uploads_dir)
        .await
        .map_err(anyhow::Error::from)?;
    tokio::fs::write(state.uploads_dir.join(&file_name), &upload.bytes)
        .await
        .map_err(anyhow::Error::from)?;

    Ok(format!("{UPLOADS_ROUTE}/{file_name}"))
}

/// Only pictures we stored ourselves are removed; external URLs are left alone.
async fn remove_local_picture(state: &AppState, url: &str) {
    let Some(file_name) = url
        .strip_prefix(UPLOADS_ROUTE)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && *name != "..")
    else {
        return;
    };

    if let Err(e) = tokio::fs::remove_file(state.uploads_dir.join(file_name)).await {
        warn!("Could not remove old profile picture {}: {}", file_name, e);
    }
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state.db(move |db| db.list_conversations(claims.sub)).await?;
    Ok(Json(conversations))
}

/// 404 if missing, 403 unless the caller is one of the two participants.
async fn require_participant(
    state: &AppState,
    conversation_id: i64,
    user_id: i64,
) -> Result<Conversation, ApiError> {
    let conversation = state
        .db(move |db| db.get_conversation(conversation_id, user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    if !conversation.has_participant(user_id) {
        return Err(ApiError::forbidden("You are not a participant in this conversation"));
    }
    Ok(conversation)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    require_participant(&state, conversation_id, claims.sub).await?;
    let messages = state.db(move |db| db.list_messages(conversation_id)).await?;
    Ok(Json(messages))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let conversation = require_participant(&state, conversation_id, claims.sub).await?;
    let me = claims.sub;
    let other = conversation.other_participant(me);

    let updated = state.db(move |db| db.mark_messages_read(me, other)).await?;

    Ok(Json(MarkReadResponse {
        message: "Conversation marked as read".into(),
        updated,
    }))
}
