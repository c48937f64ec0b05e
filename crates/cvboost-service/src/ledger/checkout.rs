//! Pricing a pack purchase and opening the hosted checkout for it.
//!
//! Nothing here touches balances or the ledger. Credits are only granted when
//! the processor confirms payment (see `reconciler`).

use chrono::{DateTime, Utc};

use cvboost_core::{
    quote_price, Account, Coupon, CouponRejection, CreditPack, Discount, PackCatalog, PriceQuote,
    UserId,
};
use cvboost_store::{Store, StoreError};

use super::coupons::{validate_coupon, CouponError};
use super::metadata::PurchaseMetadata;
use crate::stripe::{CheckoutSessionRequest, CreatedSession, PaymentGateway, StripeError};

/// Why a checkout could not be priced or opened.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// Pack id not in the catalog.
    #[error("unknown pack: {0}")]
    UnknownPack(String),

    /// The supplied coupon failed validation.
    #[error(transparent)]
    Coupon(CouponRejection),

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The processor refused to open a session.
    #[error(transparent)]
    Gateway(#[from] StripeError),
}

impl From<CouponError> for CheckoutError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::Rejected(rejection) => Self::Coupon(rejection),
            CouponError::Store(e) => Self::Store(e),
        }
    }
}

/// A priced purchase, ready to be opened as a checkout.
#[derive(Debug, Clone)]
pub struct PricedPurchase {
    /// Catalog entry.
    pub pack: CreditPack,
    /// Final price and discount.
    pub quote: PriceQuote,
    /// Coupon that produced the discount.
    pub coupon: Option<Coupon>,
    /// Catalog version the price came from.
    pub catalog_version: u32,
}

impl PricedPurchase {
    /// Metadata to stamp on the processor session.
    #[must_use]
    pub fn metadata(&self, user_id: UserId) -> PurchaseMetadata {
        PurchaseMetadata {
            user_id,
            credits: self.pack.credits,
            pack_id: self.pack.id.clone(),
            coupon_id: self.coupon.as_ref().map(|c| c.id),
            coupon_code: self.coupon.as_ref().map(|c| c.code.clone()),
            discount_cents: self.quote.discount_cents,
            catalog_version: self.catalog_version,
        }
    }
}

/// Resolve `pack_id`, validate `coupon_code` against its list price, and
/// compute the amount to charge.
///
/// A blank coupon code counts as none.
pub async fn price_purchase(
    store: &dyn Store,
    catalog: &PackCatalog,
    user_id: &UserId,
    pack_id: &str,
    coupon_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PricedPurchase, CheckoutError> {
    let pack = catalog
        .get(pack_id)
        .cloned()
        .ok_or_else(|| CheckoutError::UnknownPack(pack_id.to_string()))?;

    let coupon = match coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => Some(validate_coupon(store, code, user_id, pack.price_cents, now).await?),
        None => None,
    };

    let quote = quote_price(&pack, coupon.as_ref().map(Discount::from), catalog.min_charge_cents);

    Ok(PricedPurchase {
        pack,
        quote,
        coupon,
        catalog_version: catalog.version,
    })
}

/// Pick the redirect origin: the caller's `Origin` if allow-listed, otherwise
/// the canonical origin.
#[must_use]
pub fn redirect_origin(allowed: &[String], canonical: &str, origin: Option<&str>) -> String {
    origin
        .map(|o| o.trim_end_matches('/'))
        .filter(|o| allowed.iter().any(|a| a == o))
        .unwrap_or(canonical)
        .to_string()
}

/// Open a processor session for exactly the quoted amount.
pub async fn open_checkout(
    gateway: &dyn PaymentGateway,
    currency: &str,
    account: &Account,
    priced: &PricedPurchase,
    origin: &str,
) -> Result<CreatedSession, CheckoutError> {
    let request = CheckoutSessionRequest {
        user_id: account.user_id,
        customer_id: account.customer_id.clone(),
        product_name: format!("{} CVBoost credits", priced.pack.credits),
        amount_cents: priced.quote.final_price_cents,
        currency: currency.to_string(),
        credits: priced.pack.credits,
        success_url: format!("{origin}/payment/success?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{origin}/pricing?checkout=cancelled"),
        metadata: priced.metadata(account.user_id).to_pairs(),
    };

    let session = gateway.create_checkout_session(&request).await?;

    tracing::info!(
        user_id = %account.user_id,
        session_id = %session.id,
        pack_id = %priced.pack.id,
        amount_cents = %priced.quote.final_price_cents,
        discount_cents = %priced.quote.discount_cents,
        coupon = ?priced.coupon.as_ref().map(|c| &c.code),
        "Checkout session opened"
    );

    Ok(session)
}
