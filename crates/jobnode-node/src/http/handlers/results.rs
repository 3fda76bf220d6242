//! Result long-poll handler.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use jobnode_core::{RunId, RunResult};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info};

use crate::http::responses::{ErrorResponse, NextResultQuery, ResultResponse};
use crate::http::{HttpState, MAX_WAIT_SECS};

/// Hand out the next finished run, waiting up to `wait_secs` for one.
///
/// A result is handed out again until it is acknowledged, so a poller that
/// goes away mid-response loses nothing. Concurrent pollers queue on the
/// feed in arrival order.
pub async fn next_result(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<NextResultQuery>,
) -> impl IntoResponse {
    if let Some(result) = state.unacked() {
        debug!(run_id = %result.run_id, "Handing out unacknowledged result again");
        return found(result);
    }

    let wait = Duration::from_secs(query.wait_secs.min(MAX_WAIT_SECS));
    let mut results = state.results.lock().await;

    // Another poller may have taken one while this one queued.
    if let Some(result) = state.unacked() {
        return found(result);
    }

    let received = if wait.is_zero() {
        match results.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => return StatusCode::NO_CONTENT.into_response(),
            Err(TryRecvError::Disconnected) => None,
        }
    } else {
        match tokio::time::timeout(wait, results.recv()).await {
            Ok(received) => received,
            Err(_) => return StatusCode::NO_CONTENT.into_response(),
        }
    };

    match received {
        Some(result) => {
            state.hold(&result);
            found(result)
        }
        None => {
            error!("Completion feed has stopped");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "Completion feed has stopped".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Acknowledge the result handed out for `run_id`.
pub async fn ack_result(
    State(state): State<Arc<HttpState>>,
    Path(run_id): Path<u64>,
) -> impl IntoResponse {
    let run_id = RunId::new(run_id);
    if state.acknowledge(run_id) {
        info!(run_id = %run_id, "Result acknowledged");
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No unacknowledged result for run {}", run_id),
            }),
        )
            .into_response()
    }
}

fn found(result: RunResult) -> axum::response::Response {
    (StatusCode::OK, Json(ResultResponse::from(result))).into_response()
}
