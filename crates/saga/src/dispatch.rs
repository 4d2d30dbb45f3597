//! Outbound step commands and start messages.

use std::sync::Arc;

use common::{Data, SagaId};
use messaging::{Delivery, Envelope, Publisher};
use serde_json::Value;

use crate::error::Result;

/// A command for an external service to perform one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCommand {
    pub saga_id: SagaId,
    pub flow_name: String,
    pub step_name: String,
    /// Command name; differs from the step name for rollback steps and
    /// steps with an explicit command.
    pub message_type: String,
    pub topic: String,
    /// Saga context at dispatch time.
    pub data: Data,
    pub rollback: bool,
}

/// Publishes step commands and flow-start messages.
///
/// Messages are keyed by saga id so one saga's traffic stays on one
/// partition.
#[derive(Clone)]
pub struct CommandDispatcher {
    publisher: Arc<dyn Publisher>,
}

impl CommandDispatcher {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    #[tracing::instrument(skip(self, command), fields(saga_id = %command.saga_id, step = %command.step_name, topic = %command.topic))]
    pub async fn dispatch(&self, command: &StepCommand) -> Result<Delivery> {
        let envelope = Envelope::builder(&command.message_type)
            .key(command.saga_id.to_string())
            .correlation_id(command.saga_id.to_string())
            .field("MessageName", Value::String(command.message_type.clone()))
            .field("SagaId", Value::String(command.saga_id.to_string()))
            .field("FlowName", Value::String(command.flow_name.clone()))
            .field("StepName", Value::String(command.step_name.clone()))
            .field("IsRollback", Value::Bool(command.rollback))
            .field_from("Data", &command.data)?
            .build();

        let delivery = self.publisher.publish(&command.topic, &envelope).await?;
        metrics::counter!(
            "saga_commands_dispatched_total",
            "rollback" => command.rollback.to_string()
        )
        .increment(1);
        tracing::info!(
            message_type = %command.message_type,
            partition = delivery.partition,
            offset = delivery.offset,
            "step command dispatched"
        );
        Ok(delivery)
    }

    /// Publishes a message that starts `flow_name` on `topic` under `saga_id`.
    pub async fn publish_start(
        &self,
        flow_name: &str,
        topic: &str,
        saga_id: SagaId,
        data: &Data,
    ) -> Result<Delivery> {
        let envelope = Envelope::builder(flow_name)
            .key(saga_id.to_string())
            .correlation_id(saga_id.to_string())
            .field("MessageName", Value::String(flow_name.to_string()))
            .field("FlowName", Value::String(flow_name.to_string()))
            .field("SagaId", Value::String(saga_id.to_string()))
            .field_from("InitialData", data)?
            .build();

        Ok(self.publisher.publish(topic, &envelope).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::InMemoryBus;
    use serde_json::json;

    #[tokio::test]
    async fn test_command_body_and_key() {
        let bus = InMemoryBus::new();
        let dispatcher = CommandDispatcher::new(Arc::new(bus.clone()));
        let saga_id = SagaId::new();

        let mut data = Data::new();
        data.insert("orderId".to_string(), json!("O1"));
        dispatcher
            .dispatch(&StepCommand {
                saga_id,
                flow_name: "order-processing".into(),
                step_name: "create-order.rollback".into(),
                message_type: "create-order.command".into(),
                topic: "order-commands".into(),
                data,
                rollback: true,
            })
            .await
            .unwrap();

        let messages = bus.messages("order-commands");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some(saga_id.to_string().as_str()));
        assert_eq!(messages[0].header("CorrelationId"), Some(saga_id.to_string().as_str()));

        let body = messages[0].json().unwrap();
        assert_eq!(body["MessageType"], "create-order.command");
        assert_eq!(body["StepName"], "create-order.rollback");
        assert_eq!(body["IsRollback"], true);
        assert_eq!(body["SagaId"], saga_id.to_string());
        assert_eq!(body["Data"]["orderId"], "O1");
    }
}
