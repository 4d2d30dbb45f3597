//! Message transport for the saga orchestrator.
//!
//! Outbound messages are [`Envelope`]s published through a [`Publisher`];
//! inbound records arrive as [`Message`]s from a [`Consumer`]. The
//! [`MessageProcessor`] runs the consume loop: it resolves each message's
//! type, dispatches it through the [`HandlerRegistry`], and commits the
//! offset according to the handler's result.
//!
//! [`InMemoryBus`] implements both sides in-process. The `kafka` feature
//! adds a Kafka-backed implementation.

pub mod envelope;
pub mod error;
pub mod handler;
pub mod inbound;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod processor;
pub mod transport;

pub use envelope::{Envelope, Message, headers};
pub use error::{HandlerError, MessagingError, Result};
pub use handler::{HandlerRegistry, MessageHandler};
pub use inbound::InboundMessage;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaPublisher, KafkaSettings};
pub use memory::{InMemoryBus, InMemoryConsumer};
pub use processor::{Disposition, MessageProcessor, ProcessorConfig};
pub use transport::{Consumer, Delivery, Publisher};
