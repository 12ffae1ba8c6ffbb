//! Error types for the chat sync engine.

use crate::types::ConversationId;
use thiserror::Error;

/// Result type for chat sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while syncing a conversation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single stream event could not be decoded. The connection stays up.
    #[error("Malformed stream payload: {0}")]
    Payload(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Event stream closed")]
    StreamClosed,

    /// The stream sent a line longer than the parser accepts.
    #[error("Event stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Sync controller shut down")]
    Shutdown,

    /// A submit targeted a conversation other than the one being synced.
    #[error("Conversation {expected} is not active (active: {active:?})")]
    ConversationMismatch {
        expected: ConversationId,
        active: Option<ConversationId>,
    },
}

impl SyncError {
    /// True for errors scoped to one stream event rather than the connection.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, SyncError::Payload(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if let Some(status) = err.status() {
            SyncError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            SyncError::Http(err.to_string())
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config(format!("invalid URL: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_error_classification() {
        assert!(SyncError::Payload("bad".into()).is_payload_error());
        assert!(!SyncError::StreamClosed.is_payload_error());
        assert!(!SyncError::Timeout.is_payload_error());
    }

    #[test]
    fn test_status_accessor() {
        let err = SyncError::Status {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("503"));
        assert_eq!(SyncError::Shutdown.status(), None);
    }
}
