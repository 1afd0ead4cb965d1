use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use carelay_shared::ValidationError;
use carelay_store::StoreError;
use thiserror::Error;

use crate::presence::PresenceError;

/// Failures of a relay operation, reported to the originating session as an
/// `error` event. None of them ends the session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to send message: {0}")]
    SendFailed(#[source] StoreError),

    #[error("Announce an identity before sending events")]
    NotBound,

    #[error("Presence directory unavailable: {0}")]
    Presence(#[from] PresenceError),
}

impl RelayError {
    /// Text sent to the client. Storage and presence internals stay in logs.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Validation(e) => e.to_string(),
            RelayError::SendFailed(_) => "Failed to send message".to_string(),
            RelayError::NotBound => self.to_string(),
            RelayError::Presence(_) => "Presence service unavailable".to_string(),
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(e) => RelayError::Validation(e),
            other => RelayError::SendFailed(other),
        }
    }
}

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Message store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(e) => ServerError::BadRequest(e.to_string()),
            StoreError::Worker(e) => ServerError::Internal(e),
            other => ServerError::Store(other),
        }
    }
}

impl From<ValidationError> for ServerError {
    fn from(err: ValidationError) -> Self {
        ServerError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(e) => {
                tracing::error!(error = %e, "Message store request failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Message store unavailable".to_string(),
                )
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
