//! HTTP server for the node.
//!
//! Provides endpoints for:
//! - Run submission (`POST /runs`)
//! - Result long-poll (`GET /results/next?wait_secs=N`)
//! - Result acknowledgement (`POST /results/:run_id/ack`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use jobnode_core::{RunId, RunResult};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::orchestrator::Orchestrator;

mod handlers;
pub mod responses;

/// Longest a result long-poll may block.
pub const MAX_WAIT_SECS: u64 = 60;

/// Shared state of the HTTP handlers.
pub struct HttpState {
    pub orchestrator: Arc<Orchestrator>,

    /// Receiving end of the completion feed.
    results: Mutex<mpsc::Receiver<RunResult>>,

    /// Result handed out but not acknowledged yet. It is handed out again
    /// until it is.
    unacked: parking_lot::Mutex<Option<RunResult>>,
}

impl HttpState {
    pub fn new(orchestrator: Arc<Orchestrator>, results: mpsc::Receiver<RunResult>) -> Self {
        Self {
            orchestrator,
            results: Mutex::new(results),
            unacked: parking_lot::Mutex::new(None),
        }
    }

    fn unacked(&self) -> Option<RunResult> {
        self.unacked.lock().clone()
    }

    fn hold(&self, result: &RunResult) {
        *self.unacked.lock() = Some(result.clone());
    }

    /// Drop the unacknowledged result if it belongs to `run_id`.
    fn acknowledge(&self, run_id: RunId) -> bool {
        let mut unacked = self.unacked.lock();
        match unacked.as_ref() {
            Some(result) if result.run_id == run_id => {
                *unacked = None;
                true
            }
            _ => false,
        }
    }

    /// Every result not acknowledged by a client: the one handed out, then
    /// whatever the feed buffered. Stop the feed first.
    pub async fn drain_undelivered(&self) -> Vec<RunResult> {
        let mut undelivered: Vec<RunResult> = self.unacked.lock().take().into_iter().collect();
        let mut results = self.results.lock().await;
        results.close();
        while let Ok(result) = results.try_recv() {
            undelivered.push(result);
        }
        undelivered
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<HttpState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // API routes
        .route("/runs", post(handlers::submit_run))
        .route("/results/next", get(handlers::next_result))
        .route("/results/:run_id/ack", post(handlers::ack_result))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use jobnode_core::{TaskId, TaskStatus};
    use jobnode_testkit::FakeCluster;
    use tower::ServiceExt;

    fn state(cluster: FakeCluster, dir: &std::path::Path) -> (Arc<HttpState>, mpsc::Sender<RunResult>) {
        let orchestrator = Arc::new(Orchestrator::new(context(cluster, dir)));
        let (tx, rx) = mpsc::channel(4);
        (Arc::new(HttpState::new(orchestrator, rx)), tx)
    }

    fn finished(run_id: u64) -> RunResult {
        RunResult {
            run_id: RunId::new(run_id),
            task_id: TaskId::new(2),
            parent_id: None,
            status: TaskStatus::Completed,
            logs: "done\n".to_string(),
            data: b"42".to_vec(),
            finished_at: chrono::Utc::now(),
        }
    }

    fn next(wait_secs: u64) -> Request<Body> {
        Request::builder()
            .uri(format!("/results/next?wait_secs={}", wait_secs))
            .body(Body::empty())
            .unwrap()
    }

    fn ack(run_id: u64) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/results/{}/ack", run_id))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _tx) = state(FakeCluster::new(), dir.path());

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = create_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_submit_run() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let (state, _tx) = state(cluster.clone(), dir.path());

        let body = serde_json::json!({
            "run_id": 7,
            "task_id": 3,
            "image": "allowed/algo",
            "task_info": {"alpha": "1"},
        });
        let req = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = create_router(state).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ACTIVE");
        cluster.assert_created_count_eq(1);
    }

    #[tokio::test]
    async fn test_submit_unknown_dataset_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new();
        let (state, _tx) = state(cluster.clone(), dir.path());

        let body = serde_json::json!({
            "run_id": 8,
            "task_id": 3,
            "image": "allowed/algo",
            "databases_to_use": ["missing"],
        });
        let req = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = create_router(state).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(cluster.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_next_result_empty_is_no_content() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _tx) = state(FakeCluster::new(), dir.path());

        let req = Request::builder()
            .uri("/results/next")
            .body(Body::empty())
            .unwrap();
        let resp = create_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_next_result_delivers_queued_result() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tx) = state(FakeCluster::new(), dir.path());

        tx.send(finished(9)).await.unwrap();

        let resp = create_router(state).oneshot(next(1)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["run_id"], 9);
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["data"], "NDI=");
    }

    #[tokio::test]
    async fn test_result_repeated_until_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tx) = state(FakeCluster::new(), dir.path());
        tx.send(finished(9)).await.unwrap();
        tx.send(finished(10)).await.unwrap();
        let router = create_router(state);

        // A poller that never acknowledged sees the same result again.
        let resp = router.clone().oneshot(next(1)).await.unwrap();
        assert_eq!(body_json(resp).await["run_id"], 9);
        let resp = router.clone().oneshot(next(1)).await.unwrap();
        assert_eq!(body_json(resp).await["run_id"], 9);

        let resp = router.clone().oneshot(ack(10)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = router.clone().oneshot(ack(9)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = router.clone().oneshot(next(1)).await.unwrap();
        assert_eq!(body_json(resp).await["run_id"], 10);
        router.clone().oneshot(ack(10)).await.unwrap();

        let resp = router.oneshot(next(0)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_drain_returns_unacknowledged_and_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tx) = state(FakeCluster::new(), dir.path());
        tx.send(finished(1)).await.unwrap();
        tx.send(finished(2)).await.unwrap();

        let resp = create_router(Arc::clone(&state)).oneshot(next(1)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let undelivered: Vec<u64> = state
            .drain_undelivered()
            .await
            .iter()
            .map(|r| r.run_id.get())
            .collect();
        assert_eq!(undelivered, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _tx) = state(FakeCluster::new(), dir.path());

        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = create_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("jobnode_submissions_total"));
    }
}
