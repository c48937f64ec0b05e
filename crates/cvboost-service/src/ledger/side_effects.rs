//! Out-of-band work that must never block or fail the request that caused it.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cvboost_core::UserId;
use cvboost_store::Store;

use super::referrals;
use crate::upstream::{Notifier, PurchaseNotice};

/// Maximum number of attempts per side effect.
const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const MAX_BACKOFF_MS: u64 = 5000;

/// A queued job.
#[derive(Debug, Clone)]
pub enum SideEffect {
    /// Tell the notification endpoint about a credited purchase.
    PurchaseNotification(PurchaseNotice),

    /// The user just finished their first operation; settle any pending referral.
    ReferralCheck {
        /// The referred user.
        user_id: UserId,
    },
}

impl SideEffect {
    const fn label(&self) -> &'static str {
        match self {
            Self::PurchaseNotification(_) => "purchase_notification",
            Self::ReferralCheck { .. } => "referral_check",
        }
    }
}

/// Sender half of the side-effect queue.
#[derive(Clone)]
pub struct SideEffectQueue {
    tx: mpsc::UnboundedSender<SideEffect>,
}

impl SideEffectQueue {
    /// Start the worker and return a handle for enqueueing.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SideEffect>();

        tokio::spawn(async move {
            while let Some(effect) = rx.recv().await {
                let store = store.clone();
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    let label = effect.label();
                    if let Err(e) = with_retry(label, || run(&effect, store.as_ref(), notifier.as_ref())).await {
                        tracing::error!(
                            side_effect = %label,
                            error = %e,
                            effect = ?effect,
                            "Side effect failed after all retries"
                        );
                    }
                });
            }
            tracing::debug!("Side-effect queue closed");
        });

        Self { tx }
    }

    /// Queue `effect`. Never fails the caller.
    pub fn enqueue(&self, effect: SideEffect) {
        if let Err(e) = self.tx.send(effect) {
            tracing::error!(effect = ?e.0, "Side-effect queue is closed, dropping job");
        }
    }
}

async fn run(effect: &SideEffect, store: &dyn Store, notifier: &dyn Notifier) -> Result<(), String> {
    match effect {
        SideEffect::PurchaseNotification(notice) => notifier
            .purchase_completed(notice)
            .await
            .map_err(|e| e.to_string()),
        SideEffect::ReferralCheck { user_id } => referrals::reward_first_operation(store, user_id)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
    }
}

/// Run `op` with exponential backoff.
async fn with_retry<F, Fut, E>(label: &str, mut op: F) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;

                if attempt >= MAX_ATTEMPTS {
                    tracing::warn!(
                        side_effect = %label,
                        attempt = %attempt,
                        error = %e,
                        "Side effect failed after max retries"
                    );
                    return Err(e);
                }

                tracing::debug!(
                    side_effect = %label,
                    attempt = %attempt,
                    backoff_ms = %backoff_ms,
                    error = %e,
                    "Side effect failed, retrying"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
