//! Turn a signed `checkout.session.completed` webhook into exactly one credit.
//!
//! Each gate below either passes or rejects with no mutation:
//! signature, event type, payment status, metadata, price, duplicate check.
//! Only then is the purchase written, as one atomic insert-and-credit keyed by
//! the session id, so concurrent or replayed deliveries credit at most once.

use std::sync::Arc;

use cvboost_core::{Account, CouponRedemption, CreditTransaction, PackCatalog, UserId};
use cvboost_store::{CreditOutcome, Store, StoreError};

use super::metadata::{MetadataError, PurchaseMetadata};
use super::side_effects::{SideEffect, SideEffectQueue};
use crate::stripe::{verify_signature, CompletedSession, SignatureError, StripeEvent};
use crate::upstream::PurchaseNotice;

/// The only event type that grants credits.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Terminal result of a webhook that was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Credits were granted by this delivery.
    Credited {
        /// Buyer.
        user_id: UserId,
        /// Credits granted.
        credits: i64,
        /// Balance afterwards.
        balance: i64,
    },
    /// This session was already credited.
    Duplicate,
    /// Event type we do not act on.
    Ignored,
    /// Session completed without payment.
    NotPaid,
}

/// Why a webhook was refused.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// No signing secret is configured; nothing can be verified.
    #[error("webhook secret is not configured")]
    NotConfigured,

    /// Missing or bad signature.
    #[error("invalid signature: {0}")]
    SignatureInvalid(#[from] SignatureError),

    /// Body is not a Stripe event.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Signed by Stripe but the purchase data does not match our catalog.
    #[error("tampered purchase: {0}")]
    TamperedMetadata(String),

    /// Storage failed; the processor should redeliver.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MetadataError> for ReconcileError {
    fn from(err: MetadataError) -> Self {
        Self::TamperedMetadata(err.to_string())
    }
}

/// Webhook signature settings.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// Endpoint signing secret.
    pub secret: Option<String>,
    /// Allowed clock skew in seconds.
    pub tolerance_seconds: i64,
}

/// Applies payment confirmations to the ledger.
#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn Store>,
    catalog: Arc<PackCatalog>,
    side_effects: SideEffectQueue,
    signature: SignatureConfig,
}

impl WebhookReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<PackCatalog>,
        side_effects: SideEffectQueue,
        signature: SignatureConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            side_effects,
            signature,
        }
    }

    /// Verify and apply one delivery. `now` is unix seconds.
    pub async fn reconcile(
        &self,
        payload: &str,
        signature_header: Option<&str>,
        now: i64,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let secret = self
            .signature
            .secret
            .as_deref()
            .ok_or(ReconcileError::NotConfigured)?;
        let header = signature_header.ok_or(SignatureError::MissingSignature)?;
        verify_signature(payload, header, secret, self.signature.tolerance_seconds, now)?;

        let event: StripeEvent =
            serde_json::from_str(payload).map_err(|e| ReconcileError::Malformed(e.to_string()))?;

        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Received Stripe webhook");

        if event.event_type != CHECKOUT_COMPLETED {
            tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
            return Ok(ReconcileOutcome::Ignored);
        }

        let session: CompletedSession = serde_json::from_value(event.data.object)
            .map_err(|e| ReconcileError::Malformed(e.to_string()))?;

        if session.payment_status.as_deref() != Some("paid") {
            tracing::info!(
                session_id = %session.id,
                payment_status = ?session.payment_status,
                "Checkout session not paid, skipping"
            );
            return Ok(ReconcileOutcome::NotPaid);
        }

        let (metadata, amount_paid) = self.validate_purchase(&session)?;

        if self.store.get_transaction_by_session(&session.id).await?.is_some() {
            tracing::info!(session_id = %session.id, "Checkout session already credited");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let purchase = CreditTransaction::purchase(
            metadata.user_id,
            metadata.credits,
            amount_paid,
            session.id.clone(),
            format!("Purchased {} credits ({})", metadata.credits, metadata.pack_id),
        );

        let balance = match self.credit(&purchase).await? {
            CreditOutcome::Credited { balance } => balance,
            CreditOutcome::Duplicate => {
                tracing::info!(session_id = %session.id, "Concurrent delivery already credited");
                return Ok(ReconcileOutcome::Duplicate);
            }
        };

        tracing::info!(
            user_id = %metadata.user_id,
            session_id = %session.id,
            credits = %metadata.credits,
            amount_paid_cents = %amount_paid,
            new_balance = %balance,
            transaction_id = %purchase.id,
            "Credits added from Stripe checkout"
        );

        self.settle_coupon(&metadata, &purchase).await;

        self.side_effects
            .enqueue(SideEffect::PurchaseNotification(PurchaseNotice {
                user_id: metadata.user_id,
                credits: metadata.credits,
                amount_paid_cents: amount_paid,
                discount_cents: metadata.coupon_id.map(|_| metadata.discount_cents),
                coupon_code: metadata.coupon_code.clone(),
                session_id: session.id.clone(),
            }));

        Ok(ReconcileOutcome::Credited {
            user_id: metadata.user_id,
            credits: metadata.credits,
            balance,
        })
    }

    /// Check the session against the catalog. Returns the parsed metadata and
    /// the amount actually paid.
    fn validate_purchase(
        &self,
        session: &CompletedSession,
    ) -> Result<(PurchaseMetadata, i64), ReconcileError> {
        let metadata = PurchaseMetadata::from_map(&session.metadata).map_err(|e| {
            tracing::warn!(session_id = %session.id, error = %e, "Rejected checkout metadata");
            e
        })?;

        let reject = |reason: String| {
            tracing::warn!(
                session_id = %session.id,
                user_id = %metadata.user_id,
                reason = %reason,
                "Rejected tampered checkout session"
            );
            ReconcileError::TamperedMetadata(reason)
        };

        if let Some(reference) = session.client_reference_id.as_deref() {
            if reference != metadata.user_id.to_string() {
                return Err(reject("client_reference_id does not match metadata user".into()));
            }
        }

        if metadata.credits <= 0 {
            return Err(reject(format!("non-positive credits: {}", metadata.credits)));
        }

        let amount_paid = session.amount_total.unwrap_or(0);
        if amount_paid <= 0 {
            return Err(reject(format!("non-positive amount: {amount_paid}")));
        }

        let Some(pack) = self.catalog.get(&metadata.pack_id) else {
            return Err(reject(format!("unknown pack: {}", metadata.pack_id)));
        };

        if metadata.catalog_version != self.catalog.version {
            tracing::warn!(
                session_id = %session.id,
                priced_version = metadata.catalog_version,
                current_version = self.catalog.version,
                "Checkout priced under another catalog version, revalidating against current"
            );
        }

        if metadata.credits != pack.credits {
            return Err(reject(format!(
                "credits {} do not match pack {} ({})",
                metadata.credits, pack.id, pack.credits
            )));
        }

        if amount_paid < self.catalog.min_charge_cents || amount_paid > pack.price_cents {
            return Err(reject(format!(
                "amount {amount_paid} outside [{}, {}] for pack {}",
                self.catalog.min_charge_cents, pack.price_cents, pack.id
            )));
        }

        if let Some(currency) = session.currency.as_deref() {
            if !currency.eq_ignore_ascii_case(&self.catalog.currency) {
                return Err(reject(format!("unexpected currency: {currency}")));
            }
        }

        Ok((metadata, amount_paid))
    }

    /// Idempotent insert-and-credit. An account that does not exist yet (the
    /// buyer paid before registering) is created with a zero balance first.
    async fn credit(&self, purchase: &CreditTransaction) -> Result<CreditOutcome, ReconcileError> {
        match self.store.record_credit(purchase).await {
            Err(StoreError::NotFound { entity: "account", .. }) => {
                tracing::warn!(user_id = %purchase.user_id, "Paid checkout for unknown account, creating it");
                self.store.create_account(&Account::new(purchase.user_id, 0)).await?;
                Ok(self.store.record_credit(purchase).await?)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %purchase.user_id,
                    session_id = ?purchase.session_id,
                    credits = %purchase.credits,
                    error = %e,
                    "Failed to record purchase; awaiting redelivery"
                );
                Err(e.into())
            }
            Ok(outcome) => Ok(outcome),
        }
    }

    /// Record the coupon redemption. Failure here never undoes the credit.
    async fn settle_coupon(&self, metadata: &PurchaseMetadata, purchase: &CreditTransaction) {
        let Some(coupon_id) = metadata.coupon_id else {
            return;
        };

        let redemption = CouponRedemption::new(
            coupon_id,
            metadata
                .coupon_code
                .clone()
                .unwrap_or_else(|| coupon_id.to_string()),
            metadata.user_id,
            purchase.id,
            metadata.discount_cents,
        );

        match self.store.settle_redemption(&redemption).await {
            Ok(()) => tracing::info!(
                coupon_id = %coupon_id,
                user_id = %metadata.user_id,
                discount_cents = %metadata.discount_cents,
                "Coupon redemption settled"
            ),
            Err(e @ (StoreError::Conflict(_) | StoreError::CouponExhausted | StoreError::NotFound { .. })) => {
                tracing::warn!(
                    coupon_id = %coupon_id,
                    user_id = %metadata.user_id,
                    error = %e,
                    "Coupon could not be settled after payment"
                );
            }
            Err(e) => tracing::error!(
                coupon_id = %coupon_id,
                user_id = %metadata.user_id,
                error = %e,
                "Coupon settlement failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use cvboost_core::{DiscountType, NewCoupon, TransactionType};
    use cvboost_store::MemoryStore;
    use serde_json::json;

    use super::super::coupons::validate_coupon;
    use crate::stripe::sign_payload;
    use crate::upstream::LogNotifier;

    const SECRET: &str = "whsec_unit";
    const NOW: i64 = 1_760_000_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        reconciler: WebhookReconciler,
        user: UserId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::generate();
        store.create_account(&Account::new(user, 3)).await.unwrap();
        let queue = SideEffectQueue::spawn(store.clone(), Arc::new(LogNotifier));
        let reconciler = WebhookReconciler::new(
            store.clone(),
            Arc::new(PackCatalog::default()),
            queue,
            SignatureConfig {
                secret: Some(SECRET.into()),
                tolerance_seconds: 300,
            },
        );
        Fixture {
            store,
            reconciler,
            user,
        }
    }

    fn session_event(session_id: &str, user: UserId, amount: i64, metadata: serde_json::Value) -> String {
        json!({
            "id": "evt_1",
            "type": CHECKOUT_COMPLETED,
            "data": { "object": {
                "id": session_id,
                "payment_status": "paid",
                "amount_total": amount,
                "currency": "usd",
                "client_reference_id": user.to_string(),
                "metadata": metadata
            }}
        })
        .to_string()
    }

    fn completed(session_id: &str, user: UserId, credits: &str, amount: i64) -> String {
        session_event(
            session_id,
            user,
            amount,
            json!({
                "user_id": user.to_string(),
                "credits": credits,
                "pack_id": "10-credits",
                "discount_cents": "0",
                "catalog_version": "1"
            }),
        )
    }

    async fn deliver(f: &Fixture, body: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let header = sign_payload(body, SECRET, NOW).unwrap();
        f.reconciler.reconcile(body, Some(&header), NOW).await
    }

    async fn balance(f: &Fixture) -> i64 {
        f.store.get_account(&f.user).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn credits_once_and_ignores_replays() {
        let f = fixture().await;
        let body = completed("cs_1", f.user, "10", 900);

        assert_eq!(
            deliver(&f, &body).await.unwrap(),
            ReconcileOutcome::Credited {
                user_id: f.user,
                credits: 10,
                balance: 13
            }
        );
        assert_eq!(deliver(&f, &body).await.unwrap(), ReconcileOutcome::Duplicate);
        assert_eq!(balance(&f).await, 13);

        let ledger = f.store.list_transactions(&f.user, 10, 0).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].transaction_type, TransactionType::Purchase);
        assert_eq!(ledger[0].price_paid_cents, 900);
    }

    #[tokio::test]
    async fn rejects_credit_and_price_tampering() {
        let f = fixture().await;

        for body in [
            completed("cs_a", f.user, "0", 900),
            completed("cs_b", f.user, "60", 900),
            completed("cs_c", f.user, "10", 49),
            completed("cs_d", f.user, "10", 901),
            completed("cs_e", f.user, "10", 0),
        ] {
            assert!(matches!(
                deliver(&f, &body).await,
                Err(ReconcileError::TamperedMetadata(_))
            ));
        }
        assert_eq!(balance(&f).await, 3);
    }

    #[tokio::test]
    async fn missing_secret_fails_closed() {
        let f = fixture().await;
        let reconciler = WebhookReconciler::new(
            f.store.clone(),
            Arc::new(PackCatalog::default()),
            SideEffectQueue::spawn(f.store.clone(), Arc::new(LogNotifier)),
            SignatureConfig {
                secret: None,
                tolerance_seconds: 300,
            },
        );
        let body = completed("cs_1", f.user, "10", 900);
        assert!(matches!(
            reconciler.reconcile(&body, Some("t=1,v1=00"), NOW).await,
            Err(ReconcileError::NotConfigured)
        ));
        assert_eq!(balance(&f).await, 3);
    }

    #[tokio::test]
    async fn unsigned_or_foreign_events_do_not_credit() {
        let f = fixture().await;
        let body = completed("cs_1", f.user, "10", 900);

        assert!(matches!(
            f.reconciler.reconcile(&body, None, NOW).await,
            Err(ReconcileError::SignatureInvalid(_))
        ));

        let other = json!({ "id": "evt_2", "type": "payment_intent.succeeded", "data": { "object": {} } })
            .to_string();
        assert_eq!(deliver(&f, &other).await.unwrap(), ReconcileOutcome::Ignored);
        assert_eq!(balance(&f).await, 3);
    }

    #[tokio::test]
    async fn unknown_account_is_created_then_credited() {
        let f = fixture().await;
        let stranger = UserId::generate();
        let body = completed("cs_new", stranger, "10", 900);

        assert!(matches!(
            deliver(&f, &body).await.unwrap(),
            ReconcileOutcome::Credited { balance: 10, .. }
        ));
        let account = f.store.get_account(&stranger).await.unwrap().unwrap();
        assert_eq!(account.balance, 10);
    }

    #[tokio::test]
    async fn exhausted_coupon_after_payment_keeps_both_credits() {
        let f = fixture().await;
        let other = UserId::generate();
        f.store.create_account(&Account::new(other, 3)).await.unwrap();

        let coupon = NewCoupon {
            code: "LAUNCH20".into(),
            discount_type: DiscountType::Percentage,
            discount_value: 20,
            max_uses: Some(1),
            min_purchase_cents: None,
            expires_at: Some(Utc::now() + Duration::days(1)),
        }
        .build()
        .unwrap();
        f.store.create_coupon(&coupon).await.unwrap();

        // Both buyers validate before either payment settles.
        for user in [f.user, other] {
            validate_coupon(&*f.store, "LAUNCH20", &user, 900, Utc::now())
                .await
                .unwrap();
        }

        for (session_id, user) in [("cs_first", f.user), ("cs_second", other)] {
            let body = session_event(
                session_id,
                user,
                720,
                json!({
                    "user_id": user.to_string(),
                    "credits": "10",
                    "pack_id": "10-credits",
                    "coupon_id": coupon.id.to_string(),
                    "coupon_code": "LAUNCH20",
                    "discount_cents": "180",
                    "catalog_version": "1"
                }),
            );
            assert!(matches!(
                deliver(&f, &body).await.unwrap(),
                ReconcileOutcome::Credited { credits: 10, balance: 13, .. }
            ));
        }

        let settled = f.store.get_coupon(&coupon.id).await.unwrap().unwrap();
        assert_eq!(settled.current_uses, 1);
        assert_eq!(f.store.list_redemptions(&coupon.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_priced_under_older_catalog_is_revalidated() {
        let f = fixture().await;
        let body = session_event(
            "cs_old",
            f.user,
            900,
            json!({
                "user_id": f.user.to_string(),
                "credits": "10",
                "pack_id": "10-credits",
                "catalog_version": "0"
            }),
        );

        assert!(matches!(
            deliver(&f, &body).await.unwrap(),
            ReconcileOutcome::Credited { balance: 13, .. }
        ));
    }
}
