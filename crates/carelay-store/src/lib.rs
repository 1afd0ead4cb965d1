//! # carelay-store
//!
//! Durable message log for the carelay relay, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` with typed helpers, and the async [`MessageStore`]
//! seam the relay routes through.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::{ConversationPage, PageRequest};
pub use store::{MessageStore, SqliteMessageStore};
