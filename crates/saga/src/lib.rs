//! Saga orchestration engine.
//!
//! [`SagaFlowEngine`] starts sagas from flow definitions and advances them
//! as step outcomes arrive. Every change to a saga funnels through the
//! [`UpdateQueue`], which applies mutations one at a time per saga id
//! against freshly read state and persists them with an optimistic
//! version check.
//!
//! [`build_registry`] derives the bus routing table from the loaded flows:
//! flow names start sagas, step emits apply outcomes.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod routing;
pub mod transition;
pub mod update_queue;

pub use dispatch::{CommandDispatcher, StepCommand};
pub use engine::SagaFlowEngine;
pub use error::{Result, SagaError};
pub use handlers::{OutcomeHandler, StartFlowHandler};
pub use routing::build_registry;
pub use transition::OutcomeEvent;
pub use update_queue::{UpdateQueue, UpdateQueueConfig};
