//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, checkout, coupons, credits, health, operations, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for metered operations.
/// Each one holds an upstream call open for up to the operation timeout.
const OPERATIONS_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/credits/packs` - Pack catalog
///
/// ## Accounts (JWT auth)
/// - `POST /v1/accounts` - Register account
/// - `GET /v1/accounts/me` - Get current user's account
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Get current balance
/// - `GET /v1/credits/transactions` - List ledger history
///
/// ## Metered operations (JWT auth)
/// - `POST /v1/operations/optimize-resume` - 1 credit
/// - `POST /v1/operations/search-jobs` - 2 credits
///
/// ## Purchases (JWT auth)
/// - `POST /v1/checkout` - Open a hosted checkout
/// - `POST /v1/coupons/validate` - Preview a coupon
///
/// ## Admin (`X-Admin-Key`)
/// - `POST /v1/admin/coupons` / `GET /v1/admin/coupons`
/// - `POST /v1/admin/coupons/:id/toggle`
/// - `DELETE /v1/admin/coupons/:id`
/// - `GET /v1/admin/coupons/:id/redemptions`
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let operation_routes = Router::new()
        .route("/optimize-resume", post(operations::optimize_resume))
        .route("/search-jobs", post(operations::search_jobs))
        .layer(ConcurrencyLimitLayer::new(OPERATIONS_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route(
            "/coupons",
            post(coupons::create_coupon).get(coupons::list_coupons),
        )
        .route("/coupons/:id", delete(coupons::delete_coupon))
        .route("/coupons/:id/toggle", post(coupons::toggle_coupon))
        .route("/coupons/:id/redemptions", get(coupons::list_redemptions));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/packs", get(credits::list_packs))
        // Purchases
        .route("/checkout", post(checkout::create_checkout))
        .route("/coupons/validate", post(coupons::validate_coupon))
        .nest("/operations", operation_routes)
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (not rate limited - Stripe retries on failure)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
