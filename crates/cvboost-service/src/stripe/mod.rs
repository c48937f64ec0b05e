//! Stripe payment processor integration.

mod client;
pub mod types;
pub mod webhook;

use async_trait::async_trait;

use cvboost_core::UserId;

pub use client::{StripeClient, StripeError};
pub use types::{CompletedSession, StripeEvent};
pub use webhook::{sign_payload, verify_signature, SignatureError};

/// Everything needed to open a hosted checkout for one pack.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    /// Buyer; sent as `client_reference_id`.
    pub user_id: UserId,
    /// Processor customer to attach, if the account has one.
    pub customer_id: Option<String>,
    /// Line item label.
    pub product_name: String,
    /// Exact amount to charge, already discounted and floored.
    pub amount_cents: i64,
    /// Charge currency.
    pub currency: String,
    /// Credits being bought.
    pub credits: i64,
    /// Redirect after payment.
    pub success_url: String,
    /// Redirect on cancel.
    pub cancel_url: String,
    /// Metadata echoed back on the completion webhook.
    pub metadata: Vec<(String, String)>,
}

/// A newly opened checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    /// Processor session id.
    pub id: String,
    /// Where to send the buyer.
    pub url: String,
}

/// Outbound calls to the payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a processor customer and return its id.
    async fn create_customer(&self, user_id: &UserId, email: Option<&str>)
        -> Result<String, StripeError>;

    /// Open a checkout session.
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CreatedSession, StripeError>;
}
