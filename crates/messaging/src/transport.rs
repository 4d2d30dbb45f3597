//! Producer and consumer seams.

use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::{Envelope, Message};
use crate::error::Result;

/// Where a published message landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Publishes envelopes to topics.
///
/// The envelope's key selects the partition; without a key the transport
/// chooses one.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<Delivery>;
}

/// A single consumer-group member.
#[async_trait]
pub trait Consumer: Send {
    /// Replaces the current subscription.
    async fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    /// Waits up to `timeout` for the next message.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>>;

    /// Commits the position after `message`.
    async fn commit(&mut self, message: &Message) -> Result<()>;
}
