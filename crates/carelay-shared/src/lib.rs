//! # carelay-shared
//!
//! Types shared between the relay server and the message store: user and
//! connection identities, the persisted [`protocol::ChatMessage`] record, and
//! the tagged event protocol spoken over the WebSocket transport.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use protocol::{ChatMessage, ClientEvent, ServerEvent};
pub use types::{ConnectionHandle, ConversationId, UserId};
