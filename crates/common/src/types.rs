use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key/value payload carried by sagas, step executions and bus messages.
pub type Data = HashMap<String, serde_json::Value>;

/// Unique identifier for a saga instance.
///
/// Wraps a UUID so saga ids cannot be confused with message ids or
/// other UUID-based identifiers. Also used as the bus partition key
/// and correlation id for every command a saga emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Creates a new random saga ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a saga ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SagaId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SagaId> for Uuid {
    fn from(id: SagaId) -> Self {
        id.0
    }
}

/// Returned when a string is not a valid saga id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSagaId(pub String);

impl std::fmt::Display for InvalidSagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid saga id: {}", self.0)
    }
}

impl std::error::Error for InvalidSagaId {}

impl FromStr for SagaId {
    type Err = InvalidSagaId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| InvalidSagaId(s.to_string()))
    }
}

/// Copies entries from `incoming` into `target` without overwriting keys
/// that already exist. Returns the number of keys added.
pub fn merge_additive(target: &mut Data, incoming: &Data) -> usize {
    let mut added = 0;
    for (key, value) in incoming {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_id_new_creates_unique_ids() {
        let id1 = SagaId::new();
        let id2 = SagaId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn saga_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = SagaId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn saga_id_serializes_as_plain_string() {
        let id = SagaId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn saga_id_parses_from_string() {
        let id = SagaId::new();
        let parsed: SagaId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-guid".parse::<SagaId>().is_err());
    }

    #[test]
    fn merge_keeps_first_value_written() {
        let mut context = Data::new();
        context.insert("x".to_string(), serde_json::json!(1));

        let mut incoming = Data::new();
        incoming.insert("x".to_string(), serde_json::json!(2));
        incoming.insert("y".to_string(), serde_json::json!("new"));

        let added = merge_additive(&mut context, &incoming);

        assert_eq!(added, 1);
        assert_eq!(context["x"], serde_json::json!(1));
        assert_eq!(context["y"], serde_json::json!("new"));
    }
}
