//! Saga flow definitions.
//!
//! A flow document declares named flows, each an ordered list of steps with
//! optional success/failure outcomes. Outcomes fan out to next steps
//! (including `<step>.rollback` compensation steps) and may chain into another
//! flow. Loading is tolerant: invalid entries are dropped with a warning and a
//! missing or unreadable document yields an empty, unloaded [`FlowSet`].

pub mod definition;
mod document;
pub mod error;
pub mod flow_set;

pub use definition::{
    DEFAULT_COMMAND_TOPIC, FlowDefinition, Outcome, StepDefinition, is_rollback_step,
    rollback_command_name, rollback_target,
};
pub use error::{FlowError, Result};
pub use flow_set::FlowSet;
