//! Bus handlers that feed the engine.

use std::sync::Arc;

use async_trait::async_trait;
use messaging::{HandlerError, InboundMessage, Message, MessageHandler};
use saga_store::SagaStore;

use crate::engine::SagaFlowEngine;

/// Starts a flow from a start message.
///
/// A `SagaId` in the body is honoured, which makes redelivered starts
/// idempotent.
pub struct StartFlowHandler<S> {
    engine: Arc<SagaFlowEngine<S>>,
    flow_name: String,
}

impl<S> StartFlowHandler<S> {
    pub fn new(engine: Arc<SagaFlowEngine<S>>, flow_name: impl Into<String>) -> Self {
        Self {
            engine,
            flow_name: flow_name.into(),
        }
    }
}

#[async_trait]
impl<S> MessageHandler for StartFlowHandler<S>
where
    S: SagaStore + Clone + 'static,
{
    fn name(&self) -> &'static str {
        "start-flow"
    }

    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let inbound = InboundMessage::parse(message)?;
        self.engine
            .start_saga_with_id(&self.flow_name, inbound.data, inbound.saga_id)
            .await?;
        Ok(())
    }
}

/// Applies a step outcome named by the message type.
pub struct OutcomeHandler<S> {
    engine: Arc<SagaFlowEngine<S>>,
}

impl<S> OutcomeHandler<S> {
    pub fn new(engine: Arc<SagaFlowEngine<S>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<S> MessageHandler for OutcomeHandler<S>
where
    S: SagaStore + Clone + 'static,
{
    fn name(&self) -> &'static str {
        "apply-outcome"
    }

    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let inbound = InboundMessage::parse(message)?;
        let saga_id = inbound.saga_id.ok_or_else(|| {
            HandlerError::Malformed(format!(
                "{} carries no valid SagaId",
                inbound.message_type
            ))
        })?;
        self.engine
            .apply_emit(saga_id, &inbound.message_type, inbound.data, inbound.error)
            .await?;
        Ok(())
    }
}
