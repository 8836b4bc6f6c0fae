use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in user's own profile. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub profile_picture: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author/sender embed used inside posts, comments and chats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub profile_picture: String,
    pub bio: String,
}

/// Someone else's profile as seen from outside, with follow-graph counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: i64,
    pub username: String,
    pub bio: String,
    pub profile_picture: String,
    pub created_at: DateTime<Utc>,
    pub follower_count: i64,
    pub following_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    /// Ids of the users who liked the post.
    pub likes: Vec<i64>,
    pub repost_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "User")]
    pub author: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repost {
    pub id: i64,
    pub reposter_id: i64,
    pub original_post_id: i64,
    pub created_at: DateTime<Utc>,
    pub reposter: UserSummary,
    pub original_post: Post,
}

/// One entry of the merged feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FeedItem {
    Post(Post),
    Repost(Repost),
}

impl FeedItem {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Post(post) => post.created_at,
            Self::Repost(repost) => repost.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "User")]
    pub author: UserSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Repost,
    Follow,
    Comment,
    Message,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Follow => "follow",
            Self::Comment => "comment",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "repost" => Ok(Self::Repost),
            "follow" => Ok(Self::Follow),
            "comment" => Ok(Self::Comment),
            "message" => Ok(Self::Message),
            other => Err(format!("unknown notification type: {other}")),
        }
    }
}

/// Who triggered a notification; lighter than [`UserSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderPreview {
    pub id: i64,
    pub username: String,
    pub profile_picture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPreview {
    pub id: i64,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub sender_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub post_id: Option<i64>,
    pub content: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub sender: Option<SenderPreview>,
    pub post: Option<PostPreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user1: UserSummary,
    pub user2: UserSummary,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}

impl Conversation {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: i64) -> i64 {
        if self.user1_id == user_id { self.user2_id } else { self.user1_id }
    }
}
