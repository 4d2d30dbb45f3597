use async_trait::async_trait;

use crate::{Result, SagaId, SagaInstance, SagaQuery, SagaStatus, Version};

/// Core trait for saga store implementations.
///
/// Sagas are read and written whole: a saga is always returned with all of
/// its step executions, and an update replaces the stored executions with
/// the ones on the instance. All implementations must be thread-safe.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Stores a new saga.
    ///
    /// Fails with `AlreadyExists` if the id is taken. Returns the version the
    /// saga was stored at.
    async fn create(&self, saga: &SagaInstance) -> Result<Version>;

    /// Retrieves a saga with its step executions.
    async fn get_by_id(&self, saga_id: SagaId) -> Result<Option<SagaInstance>>;

    /// Replaces a stored saga.
    ///
    /// `saga.version()` must equal the stored version, otherwise the write is
    /// rejected with `ConcurrencyConflict`. Returns the new version.
    async fn update(&self, saga: &SagaInstance) -> Result<Version>;

    /// Deletes a saga and its step executions. Returns false if it did not exist.
    async fn delete(&self, saga_id: SagaId) -> Result<bool>;

    /// Retrieves sagas matching a query, oldest first.
    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaInstance>>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Checks if a saga exists.
    async fn exists(&self, saga_id: SagaId) -> Result<bool> {
        Ok(self.get_by_id(saga_id).await?.is_some())
    }

    /// Retrieves all sagas in `status`.
    async fn list_by_status(&self, status: SagaStatus) -> Result<Vec<SagaInstance>> {
        self.query(SagaQuery::for_status(status)).await
    }

    /// Retrieves sagas that are Running or RollingBack.
    async fn list_active(&self) -> Result<Vec<SagaInstance>> {
        self.query(SagaQuery::active()).await
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}
