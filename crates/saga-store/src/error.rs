use thiserror::Error;

use crate::{SagaId, Version, model::ParseStatusError};

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The version read before a mutation no longer matches the stored one.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// The saga was not found in the store.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A saga with this id has already been created.
    #[error("Saga already exists: {0}")]
    AlreadyExists(SagaId),

    /// A stored row could not be mapped back to the model.
    #[error("Corrupt saga record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaStoreError {
    /// Returns true if retrying against freshly read state may succeed.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, SagaStoreError::ConcurrencyConflict { .. })
    }
}

impl From<ParseStatusError> for SagaStoreError {
    fn from(err: ParseStatusError) -> Self {
        SagaStoreError::Corrupt(err.to_string())
    }
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
