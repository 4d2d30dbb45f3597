//! Persistence for saga instances and their step executions.
//!
//! Every write goes through an optimistic concurrency check on the saga's
//! [`Version`]; a stale write fails with
//! [`SagaStoreError::ConcurrencyConflict`] instead of overwriting newer state.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{Data, SagaId};
pub use error::{Result, SagaStoreError};
pub use memory::InMemorySagaStore;
pub use model::{
    ParseStatusError, SagaInstance, SagaStatus, StepCompletion, StepExecution, StepStatus, Version,
};
pub use postgres::PostgresSagaStore;
pub use query::SagaQuery;
pub use store::{SagaStore, SagaStoreExt};
