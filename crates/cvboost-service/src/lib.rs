//! cvboost HTTP API service.
//!
//! This crate provides the HTTP API for the cvboost credit ledger:
//!
//! - Account registration with a signup grant and referrals
//! - Metered operations that charge credits and refund on failure
//! - Pack checkout with coupons, reconciled from Stripe webhooks
//! - Coupon administration
//!
//! # Authentication
//!
//! 1. **Bearer JWT tokens** - end users, checked by a `TokenVerifier`
//! 2. **Admin key** - operators, via `X-Admin-Key`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for consistency

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod routes;
pub mod state;
pub mod stripe;
pub mod upstream;

pub use auth::{AuthUser, JwksVerifier, TokenVerifier};
pub use config::{ServiceConfig, StoreBackend};
pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, Services};
pub use stripe::{PaymentGateway, StripeClient, StripeError};
pub use upstream::{Notifier, OperationBackend};
