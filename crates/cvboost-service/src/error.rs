//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use cvboost_core::{BillingError, CouponRejection};
use cvboost_store::StoreError;

use crate::ledger::{CheckoutError, CouponError, GuardError, ReconcileError, ReferralError};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Balance too low for a metered operation.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Coupon cannot be applied.
    #[error("{0}")]
    InvalidCoupon(CouponRejection),

    /// Unknown pack or manipulated purchase data. The reason is logged, not returned.
    #[error("purchase rejected: {0}")]
    PurchaseRejected(String),

    /// The upstream work of a metered operation failed; the charge was refunded.
    #[error("operation failed: {0}")]
    UpstreamFailed(String),

    /// Webhook failed verification or validation.
    #[error("webhook rejected: {0}")]
    WebhookRejected(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                format!("This action needs {required} credits; you have {balance}"),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::InvalidCoupon(rejection) => (
                StatusCode::BAD_REQUEST,
                "invalid_coupon",
                rejection.to_string(),
                Some(serde_json::to_value(rejection).unwrap_or_else(
                    |_| serde_json::json!({ "reason": rejection.code() }),
                )),
            ),
            Self::PurchaseRejected(reason) => {
                tracing::warn!(reason = %reason, "Purchase request rejected");
                (
                    StatusCode::BAD_REQUEST,
                    "purchase_rejected",
                    "This purchase could not be completed".to_string(),
                    None,
                )
            }
            Self::UpstreamFailed(msg) => {
                tracing::warn!(error = %msg, "Metered operation failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "operation_failed",
                    "The operation could not be completed; you were not charged".to_string(),
                    Some(serde_json::json!({ "refunded": true })),
                )
            }
            Self::WebhookRejected(msg) => (
                StatusCode::BAD_REQUEST,
                "webhook_rejected",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::InvalidAmount(msg) => Self::BadRequest(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::CouponExhausted => Self::InvalidCoupon(CouponRejection::Exhausted),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidCouponDefinition(msg) => Self::BadRequest(msg),
            BillingError::InvalidId(e) => Self::BadRequest(e.to_string()),
            BillingError::InvalidCatalog(msg) => Self::Internal(msg),
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            GuardError::Invalid(msg) => Self::BadRequest(msg),
            GuardError::Upstream(msg) => Self::UpstreamFailed(msg),
            GuardError::TimedOut => Self::UpstreamFailed("timed out".into()),
            GuardError::Store(e) => e.into(),
            GuardError::Aborted => Self::Internal("metered task aborted".into()),
        }
    }
}

impl From<CouponError> for ApiError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::Rejected(rejection) => Self::InvalidCoupon(rejection),
            CouponError::Store(e) => e.into(),
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::UnknownPack(pack) => Self::PurchaseRejected(format!("unknown pack: {pack}")),
            CheckoutError::Coupon(rejection) => Self::InvalidCoupon(rejection),
            CheckoutError::Store(e) => e.into(),
            CheckoutError::Gateway(e) => {
                tracing::error!(error = %e, "Payment processor call failed");
                Self::ExternalService("Payment provider is unavailable".into())
            }
        }
    }
}

impl From<ReferralError> for ApiError {
    fn from(err: ReferralError) -> Self {
        match err {
            ReferralError::SelfReferral => Self::BadRequest("a user cannot refer themselves".into()),
            ReferralError::UnknownReferrer => Self::BadRequest("unknown referrer".into()),
            ReferralError::Store(e) => e.into(),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotConfigured => Self::Internal("webhook secret is not configured".into()),
            ReconcileError::SignatureInvalid(e) => {
                tracing::warn!(error = %e, "Invalid Stripe webhook signature");
                Self::WebhookRejected("Invalid webhook signature".into())
            }
            ReconcileError::Malformed(msg) => Self::WebhookRejected(msg),
            ReconcileError::TamperedMetadata(_) => Self::WebhookRejected("Purchase rejected".into()),
            ReconcileError::Store(e) => e.into(),
        }
    }
}
