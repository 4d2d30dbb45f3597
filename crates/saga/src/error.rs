//! Saga engine error types.

use common::SagaId;
use messaging::{HandlerError, MessagingError};
use saga_store::SagaStoreError;
use thiserror::Error;

/// Errors that can occur while starting or advancing sagas.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The flow does not exist or has no steps.
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    /// A step is not declared in its flow.
    #[error("Unknown step '{step}' in flow '{flow}'")]
    UnknownStep { flow: String, step: String },

    /// No saga with this id.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// Every attempt to persist a mutation lost the version race.
    #[error("Saga {saga_id} update gave up after {attempts} concurrency conflicts")]
    ConcurrencyExhausted { saga_id: SagaId, attempts: u32 },

    /// The update pipeline no longer accepts work.
    #[error("Saga engine is shutting down")]
    ShuttingDown,

    /// Non-concurrency storage failure.
    #[error("Persistence error: {0}")]
    Persistence(#[from] SagaStoreError),

    /// Publishing a command failed.
    #[error("Transport error: {0}")]
    Transport(#[from] MessagingError),
}

impl SagaError {
    /// Logical errors are final for the message or request that caused them.
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            SagaError::UnknownFlow(_) | SagaError::UnknownStep { .. } | SagaError::SagaNotFound(_)
        )
    }
}

impl From<SagaError> for HandlerError {
    fn from(err: SagaError) -> Self {
        if err.is_logical() {
            HandlerError::Rejected(err.to_string())
        } else {
            HandlerError::Failed(err.to_string())
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
