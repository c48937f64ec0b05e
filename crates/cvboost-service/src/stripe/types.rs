//! Stripe API types.

use std::collections::HashMap;

use serde::Deserialize;

/// Stripe customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
}

/// Stripe Checkout session as returned when it is created.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Hosted checkout URL.
    #[serde(default)]
    pub url: Option<String>,
}

/// Stripe error response body.
#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    /// The error detail.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type (e.g. `invalid_request_error`).
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

/// Webhook event envelope.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g. `checkout.session.completed`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: StripeEventData,
}

/// Event data container.
#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    /// The object the event is about.
    pub object: serde_json::Value,
}

/// The fields of a completed Checkout session the reconciler reads.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedSession {
    /// Session ID, used as the idempotency key.
    pub id: String,
    /// `paid`, `unpaid` or `no_payment_required`.
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Amount actually charged, in cents.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Charge currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Our user id, as set when the session was opened.
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Metadata stamped at checkout. Stripe returns every value as a string.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
