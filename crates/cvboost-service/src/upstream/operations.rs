//! The backend that actually optimizes resumes and searches jobs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use cvboost_core::OperationKind;

use super::{status_error, UpstreamError};

/// Performs the work behind a metered operation.
#[async_trait]
pub trait OperationBackend: Send + Sync {
    /// Run `kind` with an already-validated `payload`.
    async fn run(&self, kind: OperationKind, payload: &Value) -> Result<Value, UpstreamError>;
}

/// Posts the payload as JSON to `{base_url}/{kind}`.
#[derive(Debug, Clone)]
pub struct HttpOperationBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOperationBackend {
    /// Create a backend client. The guard owns the overall deadline, so the
    /// client timeout only bounds a stuck connection.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl OperationBackend for HttpOperationBackend {
    async fn run(&self, kind: OperationKind, payload: &Value) -> Result<Value, UpstreamError> {
        let url = format!("{}/{}", self.base_url, kind.as_str());
        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }
}

/// Backend used when `OPERATIONS_API_URL` is unset. Every call fails, which
/// the guard turns into a refund.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredBackend;

#[async_trait]
impl OperationBackend for UnconfiguredBackend {
    async fn run(&self, _kind: OperationKind, _payload: &Value) -> Result<Value, UpstreamError> {
        Err(UpstreamError::NotConfigured("operations backend"))
    }
}
