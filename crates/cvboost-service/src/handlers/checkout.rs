//! Checkout handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::{open_checkout, price_purchase, redirect_origin};
use crate::state::AppState;

/// Checkout request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Catalog pack to buy.
    pub pack_id: String,
    /// Optional coupon code.
    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// Checkout response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    /// Hosted checkout page.
    pub redirect_url: String,
    /// Processor session id.
    pub session_id: String,
}

/// Price a pack (with optional coupon) and open a hosted checkout for it.
///
/// No credits move here; they are granted when the payment webhook arrives.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let payments = state
        .payments
        .as_ref()
        .ok_or_else(|| ApiError::ExternalService("Payments are not configured".into()))?;

    let account = state
        .store
        .get_account(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    let priced = price_purchase(
        state.store.as_ref(),
        &state.catalog,
        &auth.user_id,
        &body.pack_id,
        body.coupon_code.as_deref(),
        Utc::now(),
    )
    .await?;

    let origin = redirect_origin(
        &state.config.allowed_origins,
        &state.config.canonical_origin,
        headers.get("origin").and_then(|v| v.to_str().ok()),
    );

    let session = open_checkout(
        payments.as_ref(),
        &state.catalog.currency,
        &account,
        &priced,
        &origin,
    )
    .await?;

    Ok(Json(CheckoutResponse {
        redirect_url: session.url,
        session_id: session.id,
    }))
}
