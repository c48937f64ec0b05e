//! Metered operation handlers.
//!
//! Payloads are validated before any credits move. The charge, the upstream
//! call and any refund all happen inside `MeteredGuard::run`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cvboost_core::{OperationKind, UserId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::WorkError;
use crate::state::AppState;
use crate::upstream::UpstreamError;

const MAX_RESUME_CHARS: usize = 50_000;
const MAX_JOB_DESCRIPTION_CHARS: usize = 20_000;
const MAX_QUERY_CHARS: usize = 200;
const MAX_LOCATION_CHARS: usize = 200;

/// Resume optimization request.
#[derive(Debug, Serialize, Deserialize)]
pub struct OptimizeResumeRequest {
    /// Resume in Markdown.
    pub resume_markdown: String,
    /// Optional target job description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
}

impl OptimizeResumeRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_text("resume_markdown", &self.resume_markdown, MAX_RESUME_CHARS)?;
        if let Some(description) = &self.job_description {
            check_length("job_description", description, MAX_JOB_DESCRIPTION_CHARS)?;
        }
        Ok(())
    }
}

/// Job search request.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchJobsRequest {
    /// Search terms.
    pub query: String,
    /// Optional location filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl SearchJobsRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_text("query", &self.query, MAX_QUERY_CHARS)?;
        if let Some(location) = &self.location {
            check_length("location", location, MAX_LOCATION_CHARS)?;
        }
        Ok(())
    }
}

fn require_text(field: &str, value: &str, max_chars: usize) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    check_length(field, value, max_chars)
}

fn check_length(field: &str, value: &str, max_chars: usize) -> Result<(), ApiError> {
    if value.chars().count() > max_chars {
        return Err(ApiError::BadRequest(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(())
}

/// Result of a metered operation.
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    /// What the backend produced.
    pub result: Value,
    /// Credits charged for this call.
    pub credits_charged: i64,
    /// Balance after the charge.
    pub balance: i64,
}

/// Optimize a resume (1 credit).
pub async fn optimize_resume(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<OptimizeResumeRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    body.validate()?;
    let payload = serde_json::to_value(&body).map_err(|e| ApiError::Internal(e.to_string()))?;
    run_metered(&state, auth.user_id, OperationKind::OptimizeResume, payload).await
}

/// Search jobs (2 credits).
pub async fn search_jobs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<SearchJobsRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    body.validate()?;
    let payload = serde_json::to_value(&body).map_err(|e| ApiError::Internal(e.to_string()))?;
    run_metered(&state, auth.user_id, OperationKind::SearchJobs, payload).await
}

async fn run_metered(
    state: &AppState,
    user_id: UserId,
    kind: OperationKind,
    payload: Value,
) -> Result<Json<OperationResponse>, ApiError> {
    let backend = state.operations.clone();

    let metered = state
        .guard()
        .run(user_id, kind, move || async move {
            backend.run(kind, &payload).await.map_err(work_error)
        })
        .await?;

    tracing::info!(
        user_id = %user_id,
        operation = %kind,
        credits_charged = metered.credits_charged,
        balance = metered.balance,
        "Metered operation completed"
    );

    Ok(Json(OperationResponse {
        result: metered.value,
        credits_charged: metered.credits_charged,
        balance: metered.balance,
    }))
}

fn work_error(err: UpstreamError) -> WorkError {
    match err {
        UpstreamError::Rejected(msg) => WorkError::Invalid(msg),
        other => WorkError::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_query_is_rejected() {
        let request = SearchJobsRequest {
            query: "   ".into(),
            location: None,
        };
        assert!(matches!(request.validate(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn length_limits_count_characters() {
        let request = SearchJobsRequest {
            query: "é".repeat(MAX_QUERY_CHARS),
            location: None,
        };
        assert!(request.validate().is_ok());

        let request = SearchJobsRequest {
            query: "rust".into(),
            location: Some("x".repeat(MAX_LOCATION_CHARS + 1)),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn oversized_resume_is_rejected() {
        let request = OptimizeResumeRequest {
            resume_markdown: "a".repeat(MAX_RESUME_CHARS + 1),
            job_description: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn upstream_rejection_is_a_client_error() {
        assert!(matches!(
            work_error(UpstreamError::Rejected("bad markdown".into())),
            WorkError::Invalid(_)
        ));
        assert!(matches!(
            work_error(UpstreamError::NotConfigured("operations backend")),
            WorkError::Failed(_)
        ));
    }
}
