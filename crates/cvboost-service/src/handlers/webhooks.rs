//! Payment webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::error::ApiError;
use crate::ledger::ReconcileOutcome;
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// What happened: `credited`, `duplicate`, `ignored` or `not_paid`.
    pub status: &'static str,
}

/// Handle Stripe webhooks.
///
/// Verification and validation failures answer 4xx so Stripe stops retrying;
/// storage failures answer 5xx so it tries again.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .reconciler()
        .reconcile(&body, signature, Utc::now().timestamp())
        .await?;

    let status = match outcome {
        ReconcileOutcome::Credited { .. } => "credited",
        ReconcileOutcome::Duplicate => "duplicate",
        ReconcileOutcome::Ignored => "ignored",
        ReconcileOutcome::NotPaid => "not_paid",
    };

    Ok(Json(WebhookResponse {
        received: true,
        status,
    }))
}
