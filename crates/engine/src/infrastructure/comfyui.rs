//! ComfyUI client for workflow submission, uploads, and artifact retrieval.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use nodebridge_shared::{ClientId, ExecutionId};

use crate::config::ComfyUIConfig;

use super::ports::{ArtifactFetchPort, ImageUploadPort};

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIError {
    /// Connection-level failure: ComfyUI is down or the address is wrong.
    #[error("could not connect to ComfyUI: {0}")]
    Unreachable(String),
    /// The request was sent but ComfyUI did not answer in time.
    #[error("ComfyUI request timed out after {0} seconds")]
    Timeout(u64),
    /// ComfyUI answered with a non-success status. Carries the engine's own
    /// error body (including any per-node diagnostics) unmodified.
    #[error("ComfyUI rejected the request: {message}")]
    Rejected { message: String, node_errors: Value },
    /// ComfyUI answered 200 but the body is not what the protocol promises
    /// (e.g. a submission response without an execution id).
    #[error("unexpected ComfyUI response: {0}")]
    InvalidResponse(String),
}

impl ComfyUIError {
    fn from_reqwest(e: reqwest::Error, timeout_seconds: u64) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout_seconds)
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

/// Accepted submission: the engine-assigned execution id plus any per-node
/// validation warnings it reported alongside acceptance.
#[derive(Debug, Clone)]
pub struct SubmitAccepted {
    pub execution_id: ExecutionId,
    pub node_errors: Value,
}

#[derive(Debug, Serialize)]
struct SubmitRequest {
    prompt: Value,
    client_id: String,
}

/// Client for the ComfyUI HTTP API.
#[derive(Clone)]
pub struct ComfyUIClient {
    client: Client,
    base_url: String,
    config: ComfyUIConfig,
}

impl ComfyUIClient {
    pub fn new(base_url: &str, config: ComfyUIConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The engine's push-event endpoint, keyed by the client id submissions
    /// are made under.
    pub fn event_stream_url(&self, client_id: ClientId) -> Result<Url, ComfyUIError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ComfyUIError::InvalidResponse(format!("bad base url: {e}")))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ComfyUIError::InvalidResponse("bad base url scheme".to_string()))?;
        url.set_path("/ws");
        url.set_query(Some(&format!("clientId={client_id}")));
        Ok(url)
    }

    /// Submit a prepared workflow document for execution.
    ///
    /// The envelope is `{"prompt": document, "client_id": id}`; the engine
    /// correlates its event stream by `client_id`, not by the execution id
    /// it returns, so callers must track both.
    pub async fn submit(
        &self,
        document: Value,
        client_id: ClientId,
    ) -> Result<SubmitAccepted, ComfyUIError> {
        let timeout = self.config.submit_timeout_seconds;
        let request = SubmitRequest {
            prompt: document,
            client_id: client_id.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&request)
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
            .map_err(|e| ComfyUIError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let message = parsed
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.clone());
            let node_errors = parsed.get("node_errors").cloned().unwrap_or(Value::Null);
            return Err(ComfyUIError::Rejected {
                message,
                node_errors,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ComfyUIError::InvalidResponse(e.to_string()))?;

        // A 200 without an execution id is a validation failure in disguise.
        let Some(prompt_id) = body.get("prompt_id").and_then(|v| v.as_str()) else {
            return Err(ComfyUIError::InvalidResponse(format!(
                "submission accepted without a prompt_id: {body}"
            )));
        };

        Ok(SubmitAccepted {
            execution_id: ExecutionId::new(prompt_id),
            node_errors: body.get("node_errors").cloned().unwrap_or(Value::Null),
        })
    }

    /// Fetch the graph currently loaded in the engine's editor, as UI-format
    /// JSON. Callers normalize it through `GraphDocument::from_json`.
    pub async fn fetch_current_graph(&self) -> Result<Value, ComfyUIError> {
        let timeout = self.config.submit_timeout_seconds;
        let response = self
            .client
            .get(format!("{}/api/graph", self.base_url))
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
            .map_err(|e| ComfyUIError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyUIError::Rejected {
                message: body,
                node_errors: Value::Null,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ComfyUIError::InvalidResponse(e.to_string()))
    }

    /// Check whether the engine answers at all.
    pub async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/system_stats", self.base_url))
            .timeout(Duration::from_secs(self.config.health_timeout_seconds))
            .send()
            .await;
        matches!(result, Ok(response) if response.status().is_success())
    }
}

#[async_trait]
impl ImageUploadPort for ComfyUIClient {
    async fn upload_image(
        &self,
        path: &Path,
        original_filename: &str,
    ) -> Result<String, ComfyUIError> {
        let timeout = self.config.upload_timeout_seconds;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ComfyUIError::InvalidResponse(format!("staged file unreadable: {e}")))?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name(original_filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true")
            .text("type", "input");

        let response = self
            .client
            .post(format!("{}/upload/image", self.base_url))
            .multipart(form)
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
            .map_err(|e| ComfyUIError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyUIError::Rejected {
                message: body,
                node_errors: Value::Null,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ComfyUIError::InvalidResponse(e.to_string()))?;

        body.get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ComfyUIError::InvalidResponse(format!("upload response without a name: {body}"))
            })
    }
}

#[async_trait]
impl ArtifactFetchPort for ComfyUIClient {
    async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIError> {
        let timeout = self.config.image_timeout_seconds;
        let response = self
            .client
            .get(format!("{}/view", self.base_url))
            .query(&[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", folder_type),
            ])
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
            .map_err(|e| ComfyUIError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyUIError::Rejected {
                message: body,
                node_errors: Value::Null,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ComfyUIError::InvalidResponse(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
