use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_BODY_LEN;
use crate::error::ValidationError;
use crate::types::{ConversationId, UserId};

/// A persisted chat message, as stored and as pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned message id
    pub id: Uuid,
    /// Append sequence inside the store; doubles as the paging cursor
    pub seq: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub conversation_id: ConversationId,
    /// Server-assigned creation time
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Check a message body before it is persisted.
pub fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::MissingField("body"));
    }
    if body.len() > MAX_BODY_LEN {
        return Err(ValidationError::BodyTooLong {
            len: body.len(),
            max: MAX_BODY_LEN,
        });
    }
    Ok(())
}

/// Events a client sends to the relay.
///
/// Identity fields stay raw strings here; the session validates them so that a
/// missing or malformed id surfaces as a validation error rather than a decode
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to a user identity
    #[serde(rename_all = "camelCase")]
    Announce {
        #[serde(default)]
        user_id: String,
    },

    /// Send a chat message to another user
    #[serde(rename_all = "camelCase")]
    SendMessage {
        #[serde(default)]
        sender_id: String,
        #[serde(default)]
        receiver_id: String,
        #[serde(default)]
        body: String,
    },

    /// Typing indicator, never persisted
    #[serde(rename_all = "camelCase")]
    Typing {
        #[serde(default)]
        sender_id: String,
        #[serde(default)]
        receiver_id: String,
        #[serde(default)]
        is_typing: bool,
    },

    /// Explicit close of the session
    Disconnect,
}

/// Events the relay pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message addressed to the bound user
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        message: ChatMessage,
        sender_id: UserId,
    },

    /// Confirms that the sender's own message was durably stored
    MessageSent { message: ChatMessage },

    #[serde(rename_all = "camelCase")]
    UserTyping { sender_id: UserId, is_typing: bool },

    Error { message: String },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage { .. } => "receive_message",
            Self::MessageSent { .. } => "message_sent",
            Self::UserTyping { .. } => "user_typing",
            Self::Error { .. } => "error",
        }
    }
}
