//! Loaded flow definitions.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use saga_store::SagaStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowSetResponse {
    pub version: String,
    pub flows: Vec<FlowResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowResponse {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub topic: String,
    pub rollback: bool,
    pub steps: Vec<String>,
}

/// GET /flows: lists the flows the engine was started with.
pub async fn list<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<FlowSetResponse> {
    let flow_set = state.engine.flows();
    let mut flows: Vec<FlowResponse> = flow_set
        .flows()
        .map(|flow| FlowResponse {
            name: flow.name.clone(),
            description: flow.description.clone(),
            topic: flow.topic.clone(),
            rollback: flow.rollback,
            steps: flow.steps.iter().map(|step| step.name.clone()).collect(),
        })
        .collect();
    flows.sort_by(|a, b| a.name.cmp(&b.name));

    Json(FlowSetResponse {
        version: flow_set.version().to_string(),
        flows,
    })
}
