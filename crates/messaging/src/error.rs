//! Messaging error types.

use thiserror::Error;

/// Errors raised by the transport.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// A client could not be created.
    #[error("Transport connection error: {0}")]
    Connect(String),

    /// The broker did not accept a message.
    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    /// Polling or subscribing failed.
    #[error("Consume error: {0}")]
    Consume(String),

    /// An offset could not be committed.
    #[error("Commit error: {0}")]
    Commit(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors a message handler reports back to the consumer loop.
///
/// The variant decides whether the message's offset is committed.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be decoded. Logged and skipped.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The message was understood but refers to something unknown.
    /// Logged and skipped.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// Processing failed for a reason that may clear up. The offset is left
    /// uncommitted so the message is redelivered.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Returns true if the message should be redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Failed(_))
    }
}
