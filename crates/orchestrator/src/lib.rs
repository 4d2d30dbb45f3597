//! Saga orchestrator host.
//!
//! Wires the flow engine to an HTTP API with structured logging (tracing)
//! and Prometheus metrics. The bus consumer is started by the binary.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaFlowEngine;
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub engine: Arc<SagaFlowEngine<S>>,
}

impl<S> AppState<S> {
    pub fn new(engine: Arc<SagaFlowEngine<S>>) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/flows", get(routes::flows::list::<S>))
        .route("/sagas", post(routes::sagas::start::<S>))
        .route("/sagas/trigger", post(routes::sagas::trigger::<S>))
        .route("/sagas/active", get(routes::sagas::active::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
