/// Application name
pub const APP_NAME: &str = "carelay";

/// Joins the two sorted participant ids of a conversation
pub const CONVERSATION_SEPARATOR: char = '_';

/// Maximum user id length in bytes
pub const MAX_USER_ID_LEN: usize = 128;

/// Maximum message body size in bytes (16 KiB)
pub const MAX_BODY_LEN: usize = 16 * 1024;

/// Default page size for conversation history
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Hard upper bound for a single history page
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 4000;

/// Default presence entry lifetime in seconds
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 300;

/// Default offline buffer lifetime in seconds (24 hours)
pub const DEFAULT_OFFLINE_TTL_SECS: u64 = 86_400;

/// Default number of messages kept per offline receiver
pub const DEFAULT_OFFLINE_BUFFER_CAP: usize = 100;
