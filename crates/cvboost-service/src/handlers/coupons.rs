//! Coupon handlers: the user-facing price preview and operator management.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use cvboost_core::{Coupon, CouponId, CouponRedemption, NewCoupon};

use crate::auth::{AdminAuth, AuthUser};
use crate::error::ApiError;
use crate::ledger::price_purchase;
use crate::state::AppState;

/// Coupon preview request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    /// Code as typed by the user.
    pub code: String,
    /// Pack the coupon would apply to.
    pub pack_id: String,
}

/// Coupon preview response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponResponse {
    /// Normalized coupon code.
    pub code: String,
    /// Pack priced.
    pub pack_id: String,
    /// Credits in the pack.
    pub credits: i64,
    /// Catalog price.
    pub list_price_cents: i64,
    /// Discount that checkout would apply.
    pub discount_cents: i64,
    /// Amount that checkout would charge.
    pub final_price_cents: i64,
}

/// Preview what a coupon would do to a pack's price. Nothing is reserved.
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ValidateCouponRequest>,
) -> Result<Json<ValidateCouponResponse>, ApiError> {
    if body.code.trim().is_empty() {
        return Err(ApiError::BadRequest("code is required".into()));
    }

    let priced = price_purchase(
        state.store.as_ref(),
        &state.catalog,
        &auth.user_id,
        &body.pack_id,
        Some(&body.code),
        Utc::now(),
    )
    .await?;

    Ok(Json(ValidateCouponResponse {
        code: priced
            .coupon
            .map(|c| c.code)
            .unwrap_or_default(),
        pack_id: priced.pack.id,
        credits: priced.quote.credits,
        list_price_cents: priced.quote.list_price_cents,
        discount_cents: priced.quote.discount_cents,
        final_price_cents: priced.quote.final_price_cents,
    }))
}

fn parse_coupon_id(raw: &str) -> Result<CouponId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid coupon id: {raw}")))
}

/// Create a coupon.
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<NewCoupon>,
) -> Result<(StatusCode, Json<Coupon>), ApiError> {
    let coupon = body.build()?;
    state.store.create_coupon(&coupon).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        coupon_id = %coupon.id,
        code = %coupon.code,
        "Coupon created"
    );

    Ok((StatusCode::CREATED, Json(coupon)))
}

/// List all coupons.
pub async fn list_coupons(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> Result<Json<Vec<Coupon>>, ApiError> {
    Ok(Json(state.store.list_coupons().await?))
}

/// Flip a coupon between active and inactive.
pub async fn toggle_coupon(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(coupon_id): Path<String>,
) -> Result<Json<Coupon>, ApiError> {
    let coupon_id = parse_coupon_id(&coupon_id)?;
    let coupon = state
        .store
        .get_coupon(&coupon_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))?;

    let updated = state
        .store
        .set_coupon_active(&coupon_id, !coupon.active)
        .await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        coupon_id = %coupon_id,
        active = updated.active,
        "Coupon toggled"
    );

    Ok(Json(updated))
}

/// Delete a coupon. Existing redemptions are kept.
pub async fn delete_coupon(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(coupon_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let coupon_id = parse_coupon_id(&coupon_id)?;
    state.store.delete_coupon(&coupon_id).await?;

    tracing::info!(admin_id = %admin.admin_id, coupon_id = %coupon_id, "Coupon deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Redemption log for one coupon.
pub async fn list_redemptions(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(coupon_id): Path<String>,
) -> Result<Json<Vec<CouponRedemption>>, ApiError> {
    let coupon_id = parse_coupon_id(&coupon_id)?;
    state
        .store
        .get_coupon(&coupon_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))?;

    Ok(Json(state.store.list_redemptions(&coupon_id).await?))
}
