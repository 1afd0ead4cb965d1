use carelay_shared::ValidationError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The message was rejected before touching the database.
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The blocking worker running a query panicked or the handle was poisoned.
    #[error("Store worker error: {0}")]
    Worker(String),
}

impl StoreError {
    /// `true` when the caller sent bad input, as opposed to the store failing.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
