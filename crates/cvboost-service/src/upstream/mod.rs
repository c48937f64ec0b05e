//! Outbound services: the resume/job-search backend and purchase notifications.

mod notifier;
mod operations;

pub use notifier::{HttpNotifier, LogNotifier, Notifier, PurchaseNotice};
pub use operations::{HttpOperationBackend, OperationBackend, UnconfiguredBackend};

/// Error type for upstream calls.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Response body was not what we expected.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    /// No backend URL configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Upstream refused the input as invalid.
    #[error("upstream rejected the request: {0}")]
    Rejected(String),
}

const MAX_ERROR_BODY: usize = 512;

/// Map a non-success response to `UpstreamError`, keeping a bounded body excerpt.
async fn status_error(response: reqwest::Response) -> UpstreamError {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    if status == 400 || status == 422 {
        UpstreamError::Rejected(body)
    } else {
        UpstreamError::Status { status, body }
    }
}
