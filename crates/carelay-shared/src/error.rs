use thiserror::Error;

/// A malformed request. Rejected before any side effect happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Message body too long: {len} bytes (max {max})")]
    BodyTooLong { len: usize, max: usize },

    #[error("Sender {claimed} does not match announced identity {bound}")]
    SenderMismatch { claimed: String, bound: String },

    #[error("{reader} is not a participant of this conversation")]
    NotParticipant { reader: String },
}
