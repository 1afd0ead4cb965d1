//! Presence directory and offline buffer.
//!
//! Presence answers "which connection currently represents user X". It sits
//! behind [`PresenceDirectory`] so any relay process can read it; the Redis
//! backend shares it across processes, the in-memory backend serves a single
//! relay and the tests.
//!
//! The offline buffer is a capped, expiring side channel for messages sent to
//! absent users. It only speeds up catch-up on reconnect; the message store
//! remains the system of record.

mod memory;
mod redis_store;

use async_trait::async_trait;
use carelay_shared::{ChatMessage, ConnectionHandle, UserId};
use thiserror::Error;

pub use self::memory::{MemoryOfflineBuffer, MemoryPresence};
pub use self::redis_store::RedisPresence;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("Presence store unreachable: {0}")]
    Unavailable(String),

    #[error("Corrupt presence entry: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for PresenceError {
    fn from(err: redis::RedisError) -> Self {
        PresenceError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for PresenceError {
    fn from(err: serde_json::Error) -> Self {
        PresenceError::Corrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PresenceError>;

/// Shared user -> connection mapping with a bounded lifetime per entry.
#[async_trait]
pub trait PresenceDirectory: Send + Sync {
    /// Record `user -> handle` and `handle -> user`, replacing any previous
    /// handle for `user`.
    async fn bind(&self, user: &UserId, handle: &ConnectionHandle) -> Result<()>;

    /// Current handle for `user`, if any.
    async fn lookup(&self, user: &UserId) -> Result<Option<ConnectionHandle>>;

    /// Remove the entries owned by `handle`. The forward entry is only removed
    /// while it still points at `handle`, so a late disconnect never evicts a
    /// newer binding. Returns the user the handle was bound to.
    async fn unbind(&self, handle: &ConnectionHandle) -> Result<Option<UserId>>;

    /// Extend the lifetime of a live binding. Returns `false` when `handle` no
    /// longer represents `user`.
    async fn refresh(&self, user: &UserId, handle: &ConnectionHandle) -> Result<bool>;
}

/// Best-effort holding area for messages addressed to absent users.
#[async_trait]
pub trait OfflineBuffer: Send + Sync {
    /// Queue `message` for `receiver`, dropping the oldest entries past the cap
    /// and restarting the receiver's expiry.
    async fn push(&self, receiver: &UserId, message: &ChatMessage) -> Result<()>;

    /// Take every queued message for `receiver`, oldest first.
    async fn drain(&self, receiver: &UserId) -> Result<Vec<ChatMessage>>;
}
