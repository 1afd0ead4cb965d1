//! Query and result types for conversation history.

use carelay_shared::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use carelay_shared::ChatMessage;
use serde::Serialize;

/// Which slice of a conversation to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of messages, always within `1..=MAX_PAGE_LIMIT`.
    limit: u32,
    /// Only return messages appended before this sequence number.
    before: Option<i64>,
}

impl PageRequest {
    /// Build a request, clamping `limit` into the allowed range.
    pub fn new(limit: Option<u32>, before: Option<i64>) -> Self {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        Self { limit, before }
    }

    /// The most recent page of `limit` messages.
    pub fn latest(limit: u32) -> Self {
        Self::new(Some(limit), None)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn before(&self) -> Option<i64> {
        self.before
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One window of a conversation, oldest message first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub messages: Vec<ChatMessage>,
    /// Pass as `before` to fetch the next older page; `None` at the start of
    /// the conversation.
    pub next_cursor: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(PageRequest::default().limit(), DEFAULT_PAGE_LIMIT);
        assert_eq!(PageRequest::new(Some(0), None).limit(), 1);
        assert_eq!(PageRequest::new(Some(10_000), None).limit(), MAX_PAGE_LIMIT);
    }
}
