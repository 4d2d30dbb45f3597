use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Result, SagaId, SagaInstance, SagaQuery, SagaStoreError, Version, store::SagaStore,
};

/// In-memory saga store for tests and single-process deployments.
///
/// Applies the same version check as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, SagaInstance>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Clears all sagas.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, saga: &SagaInstance) -> Result<Version> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&saga.saga_id()) {
            return Err(SagaStoreError::AlreadyExists(saga.saga_id()));
        }

        let mut stored = saga.clone();
        stored.set_version(Version::first());
        sagas.insert(stored.saga_id(), stored);

        Ok(Version::first())
    }

    async fn get_by_id(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        Ok(self.sagas.read().await.get(&saga_id).cloned())
    }

    async fn update(&self, saga: &SagaInstance) -> Result<Version> {
        let saga_id = saga.saga_id();
        let mut sagas = self.sagas.write().await;

        let current = sagas
            .get(&saga_id)
            .map(SagaInstance::version)
            .ok_or(SagaStoreError::SagaNotFound(saga_id))?;

        if current != saga.version() {
            return Err(SagaStoreError::ConcurrencyConflict {
                saga_id,
                expected: saga.version(),
                actual: current,
            });
        }

        let next = current.next();
        let mut stored = saga.clone();
        stored.set_version(next);
        sagas.insert(saga_id, stored);

        Ok(next)
    }

    async fn delete(&self, saga_id: SagaId) -> Result<bool> {
        Ok(self.sagas.write().await.remove(&saga_id).is_some())
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaInstance>> {
        let sagas = self.sagas.read().await;
        let mut matching: Vec<_> = sagas
            .values()
            .filter(|saga| query.matches(saga))
            .cloned()
            .collect();
        matching.sort_by_key(|saga| saga.created_at());

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Data, SagaStatus, SagaStoreExt, StepStatus};

    fn new_saga() -> SagaInstance {
        let mut context = Data::new();
        context.insert("orderId".to_string(), serde_json::json!("O1"));
        SagaInstance::new(SagaId::new(), "order-processing", context)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();

        let version = store.create(&saga).await.unwrap();
        assert_eq!(version, Version::first());

        let loaded = store.get_by_id(saga.saga_id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::first());
        assert_eq!(loaded.context()["orderId"], serde_json::json!("O1"));
        assert!(store.exists(saga.saga_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        store.create(&saga).await.unwrap();

        let result = store.create(&saga).await;
        assert!(matches!(result, Err(SagaStoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_replaces_steps_and_bumps_version() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        store.create(&saga).await.unwrap();

        let mut loaded = store.get_by_id(saga.saga_id()).await.unwrap().unwrap();
        loaded.start_step("create-order", "orders", Data::new());
        let version = store.update(&loaded).await.unwrap();
        assert_eq!(version, Version::new(2));

        let reloaded = store.get_by_id(saga.saga_id()).await.unwrap().unwrap();
        assert_eq!(reloaded.steps().len(), 1);
        assert_eq!(reloaded.steps()[0].status, StepStatus::Running);
        assert_eq!(reloaded.version(), Version::new(2));
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        store.create(&saga).await.unwrap();

        let first = store.get_by_id(saga.saga_id()).await.unwrap().unwrap();
        let mut second = first.clone();

        store.update(&first).await.unwrap();
        second.succeed();
        let result = store.update(&second).await;

        match result {
            Err(SagaStoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Version::first());
                assert_eq!(actual, Version::new(2));
            }
            other => panic!("expected concurrency conflict, got {other:?}"),
        }

        let stored = store.get_by_id(saga.saga_id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), SagaStatus::Running);
    }

    #[tokio::test]
    async fn test_update_missing_saga() {
        let store = InMemorySagaStore::new();
        let result = store.update(&new_saga()).await;
        assert!(matches!(result, Err(SagaStoreError::SagaNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_active_and_by_status() {
        let store = InMemorySagaStore::new();

        let running = new_saga();
        let mut rolling_back = new_saga();
        rolling_back.begin_rollback();
        let mut done = new_saga();
        done.succeed();

        for saga in [&running, &rolling_back, &done] {
            store.create(saga).await.unwrap();
        }

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|s| s.status().is_active()));

        let succeeded = store.list_by_status(SagaStatus::Succeeded).await.unwrap();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].saga_id(), done.saga_id());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        store.create(&saga).await.unwrap();

        assert!(store.delete(saga.saga_id()).await.unwrap());
        assert!(!store.delete(saga.saga_id()).await.unwrap());
        assert_eq!(store.saga_count().await, 0);
    }
}
