//! Database row types. Users keep their own row type because it carries the
//! password hash; everything else is read straight into `threads-types` models.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use threads_types::models::{NotificationKind, UserProfile, UserSummary};

#[cfg_attr(test, derive(Debug))]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub bio: String,
    pub profile_picture: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            bio: self.bio.clone(),
            profile_picture: self.profile_picture.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            profile_picture: self.profile_picture.clone(),
            bio: self.bio.clone(),
        }
    }
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub bio: &'a str,
    pub profile_picture: &'a str,
}

/// Partial profile update; `None` leaves the column untouched.
#[derive(Debug, Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub sender_id: i64,
    pub kind: NotificationKind,
    pub post_id: Option<i64>,
    pub content: Option<String>,
}

/// Column list matching [`user_from_row`].
pub(crate) const USER_COLUMNS: &str =
    "id, username, email, password, bio, profile_picture, created_at, updated_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        bio: row.get(4)?,
        profile_picture: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Reads `id, username, profile_picture, bio` starting at column `start`.
pub(crate) fn summary_at(row: &Row<'_>, start: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(start)?,
        username: row.get(start + 1)?,
        profile_picture: row.get(start + 2)?,
        bio: row.get(start + 3)?,
    })
}
