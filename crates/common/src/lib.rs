//! Shared identifiers and data shapes used across the orchestrator crates.

pub mod types;

pub use types::{Data, InvalidSagaId, SagaId, merge_additive};
