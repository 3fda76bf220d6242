//! Kubernetes REST implementation of [`ClusterExecutor`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ExecutorError;
use crate::executor::ClusterExecutor;
use crate::protocol::{self, DeleteOptions, Job, ObjectList, Pod, Status};
use crate::types::{CreateOutcome, DeleteOutcome, JobDescriptor, JobView, LabelSelector, PodView};
use crate::watch::{spawn_polling_watch, PodWatch};

/// Connection settings for [`KubeClient`].
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// API server base URL, e.g. `https://kubernetes.default.svc`.
    pub api_url: String,
    /// Bearer token, if the API server requires one.
    pub token: Option<String>,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// How often a pod watch re-lists pods.
    pub watch_poll_interval: Duration,
}

impl KubeConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: None,
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(30),
            watch_poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_watch_poll_interval(mut self, interval: Duration) -> Self {
        self.watch_poll_interval = interval;
        self
    }
}

/// Client for the subset of the Kubernetes API the node uses.
#[derive(Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    watch_poll_interval: Duration,
}

impl KubeClient {
    /// Create a new client.
    pub fn new(config: KubeConfig) -> Result<Self, ExecutorError> {
        if config.api_url.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig("api_url is empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.filter(|t| !t.trim().is_empty()),
            watch_poll_interval: config.watch_poll_interval,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Executor request");

        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET a list, filtered by `selector` when one is given.
    fn list_request(&self, path: &str, selector: Option<&LabelSelector>) -> RequestBuilder {
        let builder = self.request(Method::GET, path);
        match selector.filter(|s| !s.is_empty()) {
            Some(selector) => builder.query(&[("labelSelector", selector.to_string())]),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<T, ExecutorError> {
        let response = check(self.list_request(path, selector).send().await?).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn delete(&self, path: &str) -> Result<DeleteOutcome, ExecutorError> {
        let response = self
            .request(Method::DELETE, path)
            .json(&DeleteOptions::background())
            .send()
            .await?;

        match check(response).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ExecutorError::NotFound(_)) => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}

/// Map non-2xx responses to errors, decoding the API's `Status` body.
async fn check(response: Response) -> Result<Response, ExecutorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let decoded: Status = serde_json::from_str(&body).unwrap_or_default();
    let message = if decoded.message.is_empty() {
        body
    } else {
        decoded.message
    };

    match status {
        StatusCode::NOT_FOUND => Err(ExecutorError::NotFound(message)),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            Err(ExecutorError::Unavailable(message))
        }
        StatusCode::GATEWAY_TIMEOUT => Err(ExecutorError::Timeout),
        _ => Err(ExecutorError::Api {
            status: status.as_u16(),
            message,
        }),
    }
}

#[async_trait]
impl ClusterExecutor for KubeClient {
    async fn create_job(
        &self,
        namespace: &str,
        descriptor: &JobDescriptor,
    ) -> Result<CreateOutcome, ExecutorError> {
        let path = format!("/apis/batch/v1/namespaces/{}/jobs", namespace);
        let response = self
            .request(Method::POST, &path)
            .json(&protocol::job_manifest(descriptor))
            .send()
            .await?;

        match check(response).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(ExecutorError::Api { status: 409, .. }) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodView>, ExecutorError> {
        let path = format!("/api/v1/namespaces/{}/pods", namespace);
        let list: ObjectList<Pod> = self.get_json(&path, Some(selector)).await?;
        Ok(list.items.into_iter().map(PodView::from).collect())
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<PodWatch, ExecutorError> {
        Ok(spawn_polling_watch(
            self.clone(),
            namespace.to_string(),
            selector.clone(),
            timeout,
            self.watch_poll_interval,
            cancel,
        ))
    }

    async fn list_jobs(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<JobView>, ExecutorError> {
        let path = format!("/apis/batch/v1/namespaces/{}/jobs", namespace);
        let list: ObjectList<Job> = self.get_json(&path, selector).await?;
        Ok(list.items.into_iter().map(JobView::from).collect())
    }

    async fn read_pod_log(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Vec<u8>, ExecutorError> {
        let path = format!("/api/v1/namespaces/{}/pods/{}/log", namespace, pod_name);
        let response = check(self.request(Method::GET, &path).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, ExecutorError> {
        self.delete(&format!("/apis/batch/v1/namespaces/{}/jobs/{}", namespace, name))
            .await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, ExecutorError> {
        self.delete(&format!("/api/v1/namespaces/{}/pods/{}", namespace, name))
            .await
    }
}
