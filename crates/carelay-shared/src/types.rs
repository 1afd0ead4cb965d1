use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CONVERSATION_SEPARATOR, MAX_USER_ID_LEN};
use crate::error::ValidationError;

/// Opaque user identity as issued by the external user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parse a raw identity, rejecting empty, oversized or ambiguous ids.
    ///
    /// The conversation separator is not allowed inside an id so that two
    /// different participant pairs can never produce the same conversation id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::MissingField("userId"));
        }
        if raw.len() > MAX_USER_ID_LEN {
            return Err(ValidationError::InvalidUserId(format!(
                "longer than {MAX_USER_ID_LEN} bytes"
            )));
        }
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == CONVERSATION_SEPARATOR)
        {
            return Err(ValidationError::InvalidUserId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Key grouping every message exchanged between exactly two participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Both ids sorted lexicographically and joined, so `between(a, b)` and
    /// `between(b, a)` always agree.
    pub fn between(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}{}{}", lo.0, CONVERSATION_SEPARATOR, hi.0))
    }

    /// Wrap a value read back from storage.
    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to one live client connection.
///
/// Formatted as `<node_id>:<uuid>` so that any relay process reading the
/// presence directory can tell which node owns the connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConnectionHandle(String);

impl ConnectionHandle {
    pub fn new(node_id: &str) -> Self {
        Self(format!("{}:{}", node_id, Uuid::new_v4()))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Node that owns this connection.
    pub fn node_id(&self) -> &str {
        self.0.split_once(':').map(|(node, _)| node).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
