use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message, Notification};

/// Events sent over the socket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: i64, username: String },

    /// Reply to `start_conversation`; the sender is already in its room
    ConversationStarted(Conversation),

    /// A chat message posted into a room the client has joined
    ReceiveMessage(Message),

    /// A notification addressed to this user was just created
    NewNotification(Notification),

    /// A command was rejected
    Error { message: String },
}

impl GatewayEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

/// Commands sent FROM client TO server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    JoinConversation { conversation_id: i64 },

    LeaveConversation { conversation_id: i64 },

    /// Open (or reuse) the two-party conversation with `user_id`.
    StartConversation { user_id: i64 },

    SendMessage { conversation_id: i64, content: String },
}
