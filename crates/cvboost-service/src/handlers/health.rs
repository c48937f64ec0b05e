//! Liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Liveness plus which payment paths are usable.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` when the process answers.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Version of the loaded pack catalog.
    pub catalog_version: u32,
    /// Checkout can open processor sessions.
    pub checkout_enabled: bool,
    /// Webhooks can be verified.
    pub webhooks_enabled: bool,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "cvboost",
        version: env!("CARGO_PKG_VERSION"),
        catalog_version: state.catalog.version,
        checkout_enabled: state.has_payments(),
        webhooks_enabled: state.config.stripe_webhook_secret.is_some(),
    })
}
