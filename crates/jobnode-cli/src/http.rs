//! HTTP client for the node's REST endpoints.

use base64::Engine;
use jobnode_core::{RunRequest, TaskStatus};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Deserialize)]
struct SubmitBody {
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// A finished run as returned by `/results/next`.
#[derive(Debug, Deserialize)]
pub struct FinishedRun {
    pub run_id: u64,
    pub task_id: u64,
    pub parent_id: Option<u64>,
    pub status: TaskStatus,
    pub logs: String,
    /// Artifact bytes (base64 encoded).
    pub data: String,
    pub finished_at: String,
}

impl FinishedRun {
    /// Decode the artifact bytes.
    pub fn artifact(&self) -> Result<Vec<u8>, ClientError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| ClientError::InvalidResponse(format!("artifact is not base64: {}", e)))
    }
}

/// HTTP client for a jobnode node.
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Check if the node is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        debug!(url = %url, "Checking health");

        let response = self.inner.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    /// Submit a run and return the node's answer.
    pub async fn submit(&self, request: &RunRequest) -> Result<TaskStatus, ClientError> {
        let url = format!("{}/runs", self.base_url);
        debug!(url = %url, run_id = %request.run_id, "Submitting run");

        let response = self.inner.post(&url).json(request).send().await?;
        let response = check(response).await?;
        let body: SubmitBody = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.status)
    }

    /// Wait up to `wait_secs` for the next finished run.
    pub async fn next_result(&self, wait_secs: u64) -> Result<Option<FinishedRun>, ClientError> {
        let url = format!("{}/results/next", self.base_url);
        debug!(url = %url, wait_secs, "Polling for result");

        let response = self
            .inner
            .get(&url)
            .query(&[("wait_secs", wait_secs)])
            .send()
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let response = check(response).await?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Acknowledge a result, so the node stops handing it out.
    pub async fn ack(&self, run_id: u64) -> Result<(), ClientError> {
        let url = format!("{}/results/{}/ack", self.base_url, run_id);
        debug!(url = %url, run_id, "Acknowledging result");

        let response = self.inner.post(&url).send().await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    Err(ClientError::Node {
        status: status.as_u16(),
        message,
    })
}
