//! Raw YAML shapes and their conversion into the validated model.
//!
//! Each flow, step and outcome is deserialized on its own so a bad entry is
//! dropped without taking the rest of the document with it.

use std::collections::HashSet;

use serde::Deserialize;
use serde_yaml::Value;

use crate::definition::{DEFAULT_COMMAND_TOPIC, FlowDefinition, Outcome, StepDefinition};
use crate::error::{FlowError, Result};

const DEFAULT_VERSION: &str = "1.0";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    version: Option<Value>,
    flows: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawFlow {
    description: Option<String>,
    topic: Option<String>,
    rollback: Option<bool>,
    steps: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawStep {
    name: Option<String>,
    topic: Option<String>,
    command: Option<String>,
    on_success: Option<Value>,
    on_failure: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawOutcome {
    emit: Option<String>,
    topic: Option<String>,
    next_steps: Option<NextSteps>,
    #[serde(alias = "nextFlow")]
    next_flows: Option<String>,
}

/// `nextSteps` accepts a single name or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NextSteps {
    One(String),
    Many(Vec<String>),
}

impl NextSteps {
    fn into_vec(self) -> Vec<String> {
        let names = match self {
            NextSteps::One(name) => vec![name],
            NextSteps::Many(names) => names,
        };
        names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect()
    }
}

/// A document after tolerant conversion.
pub(crate) struct ParsedDocument {
    pub version: String,
    pub flows: Vec<FlowDefinition>,
}

pub(crate) fn parse(text: &str) -> Result<ParsedDocument> {
    let root: Value = serde_yaml::from_str(text)?;
    if root.is_null() {
        return Ok(ParsedDocument {
            version: DEFAULT_VERSION.to_string(),
            flows: Vec::new(),
        });
    }
    if !root.is_mapping() {
        return Err(FlowError::InvalidDocument(
            "top level must be a mapping".to_string(),
        ));
    }

    let raw: RawDocument = serde_yaml::from_value(root)?;
    let version = match raw.version {
        Some(Value::String(v)) if !v.trim().is_empty() => v,
        Some(Value::Number(n)) => n.to_string(),
        _ => DEFAULT_VERSION.to_string(),
    };

    let mut flows = Vec::new();
    match raw.flows {
        Some(Value::Mapping(entries)) => {
            for (key, value) in entries {
                let Some(name) = key.as_str().map(str::trim).filter(|n| !n.is_empty()) else {
                    tracing::warn!(key = ?key, "dropping flow with a non-string name");
                    continue;
                };
                if let Some(flow) = convert_flow(name, value) {
                    flows.push(flow);
                }
            }
        }
        None | Some(Value::Null) => {}
        Some(_) => {
            return Err(FlowError::InvalidDocument(
                "`flows` must be a mapping of flow name to flow".to_string(),
            ));
        }
    }

    Ok(ParsedDocument { version, flows })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn convert_flow(name: &str, value: Value) -> Option<FlowDefinition> {
    let raw: RawFlow = match serde_yaml::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(flow = name, error = %e, "dropping malformed flow");
            return None;
        }
    };

    let Some(topic) = non_empty(raw.topic) else {
        tracing::warn!(flow = name, "dropping flow without a topic");
        return None;
    };

    let mut seen = HashSet::new();
    let mut steps = Vec::new();
    for (index, value) in raw.steps.unwrap_or_default().into_iter().enumerate() {
        let Some(step) = convert_step(name, index, value) else {
            continue;
        };
        if !seen.insert(step.name.clone()) {
            tracing::warn!(flow = name, step = %step.name, "dropping duplicate step");
            continue;
        }
        steps.push(step);
    }

    Some(FlowDefinition {
        name: name.to_string(),
        description: raw.description,
        topic,
        rollback: raw.rollback.unwrap_or(false) || name.to_ascii_lowercase().contains("rollback"),
        steps,
    })
}

fn convert_step(flow: &str, index: usize, value: Value) -> Option<StepDefinition> {
    let raw: RawStep = match serde_yaml::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(flow, index, error = %e, "dropping malformed step");
            return None;
        }
    };

    let Some(name) = non_empty(raw.name) else {
        tracing::warn!(flow, index, "dropping step without a name");
        return None;
    };

    let command = non_empty(raw.command);
    let topic = match (non_empty(raw.topic), &command) {
        (Some(topic), _) => topic,
        (None, Some(_)) => DEFAULT_COMMAND_TOPIC.to_string(),
        (None, None) => {
            tracing::warn!(flow, step = %name, "dropping step without a topic or command");
            return None;
        }
    };

    let on_success = raw
        .on_success
        .and_then(|v| convert_outcome(flow, &name, "onSuccess", v));
    let on_failure = raw
        .on_failure
        .and_then(|v| convert_outcome(flow, &name, "onFailure", v));

    Some(StepDefinition {
        name,
        topic,
        command,
        on_success,
        on_failure,
    })
}

fn convert_outcome(flow: &str, step: &str, branch: &str, value: Value) -> Option<Outcome> {
    if value.is_null() {
        return None;
    }

    let raw: RawOutcome = match serde_yaml::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(flow, step, branch, error = %e, "dropping malformed outcome");
            return None;
        }
    };

    let Some(emit) = non_empty(raw.emit) else {
        tracing::warn!(flow, step, branch, "dropping outcome without an emit");
        return None;
    };
    let Some(topic) = non_empty(raw.topic) else {
        tracing::warn!(flow, step, branch, %emit, "dropping outcome without a topic");
        return None;
    };

    Some(Outcome {
        emit,
        topic,
        next_steps: raw.next_steps.map(NextSteps::into_vec).unwrap_or_default(),
        next_flow: non_empty(raw.next_flows),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_steps_accepts_string_or_list() {
        let doc = parse(
            r#"
flows:
  f:
    topic: t
    steps:
      - name: a
        topic: ta
        onSuccess: { emit: a.success, topic: ev, nextSteps: b }
      - name: b
        topic: tb
        onSuccess: { emit: b.success, topic: ev, nextSteps: [c, d] }
      - { name: c, topic: tc }
      - { name: d, topic: td }
"#,
        )
        .unwrap();

        let flow = &doc.flows[0];
        assert_eq!(flow.steps[0].on_success.as_ref().unwrap().next_steps, vec!["b"]);
        assert_eq!(
            flow.steps[1].on_success.as_ref().unwrap().next_steps,
            vec!["c", "d"]
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let doc = parse(
            r#"
version: 2
owner: payments-team
flows:
  f:
    topic: t
    retries: 5
    steps:
      - { name: a, topic: ta, timeoutSeconds: 30 }
"#,
        )
        .unwrap();
        assert_eq!(doc.version, "2");
        assert_eq!(doc.flows[0].steps.len(), 1);
    }

    #[test]
    fn invalid_entries_are_dropped_individually() {
        let doc = parse(
            r#"
flows:
  no-topic:
    steps: [{ name: a, topic: ta }]
  broken:
    topic: t
    steps: "not a list"
  good:
    topic: t
    steps:
      - { topic: nameless }
      - { name: bare }
      - { name: by-command, command: charge-card }
      - name: half-outcome
        topic: th
        onSuccess: { topic: ev }
        onFailure: { emit: half-outcome.failed, topic: ev, nextFlows: refunds }
"#,
        )
        .unwrap();

        assert_eq!(doc.flows.len(), 1);
        let flow = &doc.flows[0];
        assert_eq!(flow.name, "good");
        let names: Vec<_> = flow.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["by-command", "half-outcome"]);
        assert_eq!(flow.steps[0].topic, DEFAULT_COMMAND_TOPIC);
        assert_eq!(flow.steps[0].command_name(), "charge-card");
        assert!(flow.steps[1].on_success.is_none());
        assert_eq!(
            flow.steps[1].on_failure.as_ref().unwrap().next_flow.as_deref(),
            Some("refunds")
        );
    }

    #[test]
    fn rollback_flag_from_field_or_name() {
        let doc = parse(
            r#"
flows:
  order-Rollback: { topic: t }
  compensate: { topic: t, rollback: true }
  order-processing: { topic: t }
"#,
        )
        .unwrap();
        let rollback: Vec<_> = doc.flows.iter().map(|f| (f.name.as_str(), f.rollback)).collect();
        assert_eq!(
            rollback,
            vec![
                ("order-Rollback", true),
                ("compensate", true),
                ("order-processing", false)
            ]
        );
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        assert!(parse("- just\n- a list\n").is_err());
        assert!(parse("flows: [a, b]\n").is_err());
        assert!(parse("~").unwrap().flows.is_empty());
    }
}
