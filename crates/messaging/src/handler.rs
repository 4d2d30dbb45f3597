//! Message handlers and the routing table.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::Message;
use crate::error::HandlerError;

/// Handles one kind of message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns a name for logging.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Routing table: message type to handler, topic to message types.
///
/// Built once before the consumer subscribes and read-only afterwards.
/// Message types are matched case-insensitively.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    topics: BTreeMap<String, Vec<String>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `message_type` arriving on `topic` to `handler`.
    ///
    /// The first handler registered for a message type wins; later
    /// registrations only add the topic. Returns false in that case.
    pub fn register(
        &mut self,
        message_type: impl Into<String>,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> bool {
        let message_type = message_type.into();
        let topic = topic.into();

        let types = self.topics.entry(topic.clone()).or_default();
        if !types.iter().any(|t| t.eq_ignore_ascii_case(&message_type)) {
            types.push(message_type.clone());
        }

        let key = message_type.to_lowercase();
        if self.handlers.contains_key(&key) {
            tracing::debug!(%message_type, %topic, "message type already routed");
            return false;
        }
        self.handlers.insert(key, handler);
        true
    }

    pub fn handler_for(&self, message_type: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(&message_type.to_lowercase())
    }

    /// Topics to subscribe to, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Message types expected on `topic`.
    pub fn message_types(&self, topic: &str) -> &[String] {
        self.topics.get(topic).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of routed message types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}
