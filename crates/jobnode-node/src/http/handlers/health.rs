//! Health and metrics handlers.

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::http::HttpState;

/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let body = state.orchestrator.context().metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
