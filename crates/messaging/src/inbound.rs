//! Decoding of inbound message bodies.

use common::{Data, SagaId};
use serde_json::{Map, Value};

use crate::envelope::{Message, headers};
use crate::error::HandlerError;

/// Body fields that frame a message rather than carry data.
const RESERVED_FIELDS: &[&str] = &[
    headers::MESSAGE_TYPE,
    headers::MESSAGE_NAME,
    headers::MESSAGE_ID,
    headers::CORRELATION_ID,
    headers::TIMESTAMP,
    "SagaId",
    "FlowName",
    "StepName",
    "IsRollback",
    "Success",
    "Error",
    "ErrorMessage",
    "Data",
    "InitialData",
];

/// The parts of an inbound message the saga engine cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_type: String,
    /// Absent or unparseable ids are reported as `None`.
    pub saga_id: Option<SagaId>,
    pub flow_name: Option<String>,
    pub step_name: Option<String>,
    /// `Data`, else `InitialData`, else the non-framing top-level fields.
    pub data: Data,
    pub error: Option<String>,
}

impl InboundMessage {
    /// Decodes a message body.
    ///
    /// Fails with [`HandlerError::Malformed`] if the body is not a JSON
    /// object or the message type cannot be determined.
    pub fn parse(message: &Message) -> Result<Self, HandlerError> {
        let body = message
            .json()
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;
        let Value::Object(body) = body else {
            return Err(HandlerError::Malformed(
                "message body is not a JSON object".to_string(),
            ));
        };
        let message_type = message
            .message_type()
            .ok_or_else(|| HandlerError::Malformed("message has no type".to_string()))?;

        let saga_id = string_field(&body, "SagaId")
            .or_else(|| message.header(headers::CORRELATION_ID).map(str::to_string))
            .and_then(|raw| raw.trim().parse::<SagaId>().ok());

        let data = object_field(&body, "Data")
            .or_else(|| object_field(&body, "InitialData"))
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_else(|| {
                body.iter()
                    .filter(|(k, _)| !is_reserved(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            });

        let error = string_field(&body, "ErrorMessage").or_else(|| string_field(&body, "Error"));

        Ok(Self {
            message_type,
            saga_id,
            flow_name: string_field(&body, "FlowName"),
            step_name: string_field(&body, "StepName"),
            data,
            error,
        })
    }
}

fn is_reserved(name: &str) -> bool {
    RESERVED_FIELDS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

fn field<'a>(body: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    body.get(name).or_else(|| {
        body.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn string_field(body: &Map<String, Value>, name: &str) -> Option<String> {
    field(body, name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn object_field<'a>(body: &'a Map<String, Value>, name: &str) -> Option<&'a Map<String, Value>> {
    field(body, name).and_then(Value::as_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn message(body: Value) -> Message {
        Message {
            topic: "order-events".to_string(),
            partition: 0,
            offset: 7,
            key: None,
            headers: HashMap::new(),
            payload: serde_json::to_vec(&body).unwrap(),
        }
    }

    #[test]
    fn data_object_wins_over_free_fields() {
        let saga_id = SagaId::new();
        let inbound = InboundMessage::parse(&message(json!({
            "MessageType": "create-order.success",
            "SagaId": saga_id.to_string(),
            "Data": {"orderId": "O1"},
            "ignored": true
        })))
        .unwrap();

        assert_eq!(inbound.message_type, "create-order.success");
        assert_eq!(inbound.saga_id, Some(saga_id));
        assert_eq!(inbound.data.len(), 1);
        assert_eq!(inbound.data["orderId"], json!("O1"));
    }

    #[test]
    fn initial_data_and_flow_name() {
        let inbound = InboundMessage::parse(&message(json!({
            "MessageName": "order-processing",
            "FlowName": "order-processing",
            "InitialData": {"orderId": "O2"}
        })))
        .unwrap();

        assert_eq!(inbound.flow_name.as_deref(), Some("order-processing"));
        assert_eq!(inbound.saga_id, None);
        assert_eq!(inbound.data["orderId"], json!("O2"));
    }

    #[test]
    fn free_fields_become_data() {
        let inbound = InboundMessage::parse(&message(json!({
            "MessageType": "reserve-inventory.failed",
            "SagaId": "not-a-guid",
            "ErrorMessage": "out of stock",
            "sku": "A-1",
            "quantity": 3
        })))
        .unwrap();

        assert_eq!(inbound.saga_id, None);
        assert_eq!(inbound.error.as_deref(), Some("out of stock"));
        let mut keys: Vec<_> = inbound.data.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["quantity", "sku"]);
    }

    #[test]
    fn correlation_header_supplies_saga_id() {
        let saga_id = SagaId::new();
        let mut msg = message(json!({"MessageType": "create-order.success"}));
        msg.headers
            .insert("CorrelationId".to_string(), saga_id.to_string());

        let inbound = InboundMessage::parse(&msg).unwrap();
        assert_eq!(inbound.saga_id, Some(saga_id));
    }

    #[test]
    fn rejects_non_objects() {
        let err = InboundMessage::parse(&message(json!([1, 2, 3]))).unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));

        let mut msg = message(json!({}));
        msg.payload = b"{oops".to_vec();
        assert!(matches!(
            InboundMessage::parse(&msg),
            Err(HandlerError::Malformed(_))
        ));
    }
}
