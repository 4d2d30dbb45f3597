//! Outbound envelopes and inbound messages.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;

/// Framing header names, shared by headers and JSON bodies.
pub mod headers {
    pub const MESSAGE_TYPE: &str = "MessageType";
    pub const MESSAGE_NAME: &str = "MessageName";
    pub const MESSAGE_ID: &str = "MessageId";
    pub const CORRELATION_ID: &str = "CorrelationId";
    pub const TIMESTAMP: &str = "Timestamp";
}

/// A message ready to be published.
///
/// The body is a JSON object. On the wire the framing fields (type, id,
/// correlation id, timestamp) are carried both as headers and inside the
/// body so consumers can rely on either.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Message type, e.g. `create-order` or `create-order.success`.
    pub message_type: String,

    /// Unique id of this message.
    pub message_id: Uuid,

    /// Correlates the message with a saga.
    pub correlation_id: Option<String>,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,

    /// Partitioning key.
    pub key: Option<String>,

    /// JSON body.
    pub body: Value,
}

impl Envelope {
    /// Starts an envelope of the given message type.
    pub fn builder(message_type: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder {
            message_type: message_type.into(),
            message_id: None,
            correlation_id: None,
            timestamp: None,
            key: None,
            body: Map::new(),
        }
    }

    /// Header pairs carried alongside the body.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (headers::MESSAGE_TYPE.to_string(), self.message_type.clone()),
            (headers::MESSAGE_ID.to_string(), self.message_id.to_string()),
            (headers::TIMESTAMP.to_string(), self.timestamp_string()),
        ];
        if let Some(ref correlation_id) = self.correlation_id {
            pairs.push((headers::CORRELATION_ID.to_string(), correlation_id.clone()));
        }
        pairs
    }

    /// Serializes the body with the framing fields stamped into it.
    ///
    /// A non-object body is wrapped under `Data`.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let mut body = match &self.body {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("Data".to_string(), other.clone());
                map
            }
        };
        body.insert(
            headers::MESSAGE_TYPE.to_string(),
            Value::String(self.message_type.clone()),
        );
        body.insert(
            headers::MESSAGE_ID.to_string(),
            Value::String(self.message_id.to_string()),
        );
        body.insert(
            headers::TIMESTAMP.to_string(),
            Value::String(self.timestamp_string()),
        );
        if let Some(ref correlation_id) = self.correlation_id {
            body.insert(
                headers::CORRELATION_ID.to_string(),
                Value::String(correlation_id.clone()),
            );
        }
        Ok(serde_json::to_vec(&Value::Object(body))?)
    }

    fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Builder for [`Envelope`].
#[derive(Debug)]
pub struct EnvelopeBuilder {
    message_type: String,
    message_id: Option<Uuid>,
    correlation_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    key: Option<String>,
    body: Map<String, Value>,
}

impl EnvelopeBuilder {
    /// Sets the message id. A random id is used otherwise.
    pub fn message_id(mut self, id: Uuid) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the timestamp. The current time is used otherwise.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets one body field.
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.body.insert(name.into(), value);
        self
    }

    /// Sets one body field from a serializable value.
    pub fn field_from<T: Serialize>(self, name: impl Into<String>, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.field(name, value))
    }

    pub fn build(self) -> Envelope {
        Envelope {
            message_type: self.message_type,
            message_id: self.message_id.unwrap_or_else(Uuid::new_v4),
            correlation_id: self.correlation_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            key: self.key,
            body: Value::Object(self.body),
        }
    }
}

/// A record received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Looks up a header, falling back to a case-insensitive match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Decodes the payload as JSON.
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Resolves the message type: headers first, then the body.
    pub fn message_type(&self) -> Option<String> {
        for name in [headers::MESSAGE_TYPE, headers::MESSAGE_NAME] {
            if let Some(value) = self.header(name).map(str::trim)
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }

        let body = self.json().ok()?;
        let object = body.as_object()?;
        [headers::MESSAGE_TYPE, headers::MESSAGE_NAME]
            .into_iter()
            .find_map(|name| {
                object
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .and_then(|(_, v)| v.as_str())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
    }
}
