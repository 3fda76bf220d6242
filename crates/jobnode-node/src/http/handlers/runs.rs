//! Run submission handler.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use jobnode_core::RunRequest;
use tracing::{info, warn};

use crate::http::responses::{ErrorResponse, SubmitResponse};
use crate::http::HttpState;
use crate::orchestrator::OrchestratorError;

/// Run submission endpoint.
///
/// Every status, `NOT_ALLOWED` and `UNKNOWN_ERROR` included, is a 200.
/// Only unusable requests and executor failures are HTTP errors.
pub async fn submit_run(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    let run_id = request.run_id;

    match state.orchestrator.submit(&request).await {
        Ok(status) => {
            info!(run_id = %run_id, status = %status, "Run submission answered");
            (StatusCode::OK, Json(SubmitResponse { status })).into_response()
        }
        Err(e) => {
            let code = match &e {
                OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::Workspace { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                OrchestratorError::Executor(err) if err.is_transient() => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                OrchestratorError::Executor(_) => StatusCode::BAD_GATEWAY,
            };
            warn!(run_id = %run_id, error = %e, "Run submission failed");
            (
                code,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
