//! Saga start and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Data, InvalidSagaId, SagaId};
use saga_store::{SagaInstance, SagaStore, StepExecution};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartSagaRequest {
    pub flow_name: String,
    #[serde(default)]
    pub initial_data: Data,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SagaStartedResponse {
    pub saga_id: String,
    pub flow_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub flow_name: String,
    pub current_step: Option<String>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepStatusResponse>,
    pub context: Data,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StepStatusResponse {
    pub name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&StepExecution> for StepStatusResponse {
    fn from(step: &StepExecution) -> Self {
        Self {
            name: step.step_name.clone(),
            status: step.status.as_str().to_string(),
            started_at: step.created_at,
            ended_at: step.ended_at,
            error: step.error_message.clone(),
        }
    }
}

impl From<&SagaInstance> for SagaStatusResponse {
    fn from(saga: &SagaInstance) -> Self {
        Self {
            saga_id: saga.saga_id().to_string(),
            flow_name: saga.flow_name().to_string(),
            current_step: saga.current_step().map(String::from),
            status: saga.status().as_str().to_string(),
            started_at: saga.created_at(),
            completed_at: saga.completed_at(),
            error: saga.error_message().map(String::from),
            steps: saga.steps().iter().map(StepStatusResponse::from).collect(),
            context: saga.context().clone(),
        }
    }
}

// -- Handlers --

/// POST /sagas: start a saga in-process and dispatch its first step.
#[tracing::instrument(skip(state, req), fields(flow = %req.flow_name))]
pub async fn start<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<SagaStartedResponse>), ApiError> {
    let saga_id = state
        .engine
        .start_saga(&req.flow_name, req.initial_data)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SagaStartedResponse {
            saga_id: saga_id.to_string(),
            flow_name: req.flow_name,
        }),
    ))
}

/// POST /sagas/trigger: publish a start message and let the consumer start the saga.
#[tracing::instrument(skip(state, req), fields(flow = %req.flow_name))]
pub async fn trigger<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<SagaStartedResponse>), ApiError> {
    let saga_id = state
        .engine
        .trigger_saga(&req.flow_name, req.initial_data)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaStartedResponse {
            saga_id: saga_id.to_string(),
            flow_name: req.flow_name,
        }),
    ))
}

/// GET /sagas/{id}: saga status with its step executions.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let saga_id: SagaId = id
        .parse()
        .map_err(|e: InvalidSagaId| ApiError::BadRequest(e.to_string()))?;

    let saga = state
        .engine
        .get_instance(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {saga_id} not found")))?;

    Ok(Json(SagaStatusResponse::from(&saga)))
}

/// GET /sagas/active: sagas still running or rolling back.
#[tracing::instrument(skip(state))]
pub async fn active<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<SagaStatusResponse>>, ApiError> {
    let sagas = state.engine.list_active().await?;
    Ok(Json(sagas.iter().map(SagaStatusResponse::from).collect()))
}
