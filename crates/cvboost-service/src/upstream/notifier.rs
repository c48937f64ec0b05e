//! Purchase notifications.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use cvboost_core::UserId;

use super::{status_error, UpstreamError};

/// What the notification endpoint receives after a credited purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseNotice {
    /// Buyer.
    pub user_id: UserId,
    /// Credits granted.
    pub credits: i64,
    /// Amount charged, in cents.
    pub amount_paid_cents: i64,
    /// Discount applied, when a coupon was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_cents: Option<i64>,
    /// Coupon code, when a coupon was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    /// Checkout session that paid for it.
    pub session_id: String,
}

/// Delivers purchase notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one notice.
    async fn purchase_completed(&self, notice: &PurchaseNotice) -> Result<(), UpstreamError>;
}

/// Posts each notice as JSON.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    url: String,
}

impl HttpNotifier {
    /// Create a notifier posting to `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn purchase_completed(&self, notice: &PurchaseNotice) -> Result<(), UpstreamError> {
        let response = self.client.post(&self.url).json(notice).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }
}

/// Logs notices instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn purchase_completed(&self, notice: &PurchaseNotice) -> Result<(), UpstreamError> {
        tracing::info!(
            user_id = %notice.user_id,
            credits = %notice.credits,
            amount_paid_cents = %notice.amount_paid_cents,
            coupon_code = ?notice.coupon_code,
            "Purchase completed"
        );
        Ok(())
    }
}
