//! Charge-then-run with refund on failure.
//!
//! A metered operation deducts its cost up front, runs the work, and gives the
//! credits back if the work fails for any reason. The whole sequence runs in
//! its own task so that a client hanging up mid-request cannot cancel the
//! refund.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cvboost_core::{CreditTransaction, OperationKind, UserId};
use cvboost_store::{Store, StoreError};

use super::side_effects::{SideEffect, SideEffectQueue};

/// How the unit of work failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    /// The input turned out to be unusable.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The work itself failed.
    #[error("{0}")]
    Failed(String),
}

/// Why a metered call did not succeed. Every variant after a successful
/// deduction implies the credits were refunded (or a refund was attempted and
/// logged).
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Nothing was deducted and the work never ran.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Operation cost.
        required: i64,
    },

    /// The work rejected its input.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The work failed.
    #[error("operation failed: {0}")]
    Upstream(String),

    /// The work exceeded its deadline and was cancelled.
    #[error("operation timed out")]
    TimedOut,

    /// The store failed while deducting.
    #[error(transparent)]
    Store(StoreError),

    /// The guard task itself was cancelled.
    #[error("operation aborted")]
    Aborted,
}

/// A successful metered result.
#[derive(Debug, Clone, PartialEq)]
pub struct Metered<T> {
    /// What the work produced.
    pub value: T,
    /// Credits kept.
    pub credits_charged: i64,
    /// Balance after the charge.
    pub balance: i64,
}

/// Wraps units of work in deduct / refund bookkeeping.
#[derive(Clone)]
pub struct MeteredGuard {
    store: Arc<dyn Store>,
    side_effects: SideEffectQueue,
    timeout: Duration,
    record_debits: bool,
}

impl MeteredGuard {
    /// Create a guard.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        side_effects: SideEffectQueue,
        timeout: Duration,
        record_debits: bool,
    ) -> Self {
        Self {
            store,
            side_effects,
            timeout,
            record_debits,
        }
    }

    /// Charge `user_id` for `kind`, then run `work`.
    ///
    /// `work` is only invoked after the deduction succeeds.
    pub async fn run<T, F, Fut>(
        &self,
        user_id: UserId,
        kind: OperationKind,
        work: F,
    ) -> Result<Metered<T>, GuardError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, WorkError>> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.clone();
        tokio::spawn(async move { guard.charge_and_run(user_id, kind, work).await })
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user_id, operation = %kind, error = %e, "Metered task aborted");
                GuardError::Aborted
            })?
    }

    async fn charge_and_run<T, F, Fut>(
        &self,
        user_id: UserId,
        kind: OperationKind,
        work: F,
    ) -> Result<Metered<T>, GuardError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, WorkError>> + Send + 'static,
        T: Send + 'static,
    {
        let cost = kind.cost();
        let balance = match self.store.deduct(&user_id, cost).await {
            Ok(balance) => balance,
            Err(StoreError::InsufficientCredits { balance, required }) => {
                tracing::debug!(user_id = %user_id, operation = %kind, balance, required, "Insufficient credits");
                return Err(GuardError::InsufficientCredits { balance, required });
            }
            Err(e) => return Err(GuardError::Store(e)),
        };

        tracing::debug!(user_id = %user_id, operation = %kind, cost, new_balance = balance, "Credits deducted");

        match self.execute(work).await {
            Ok(value) => {
                self.settle(user_id, kind, cost).await;
                Ok(Metered {
                    value,
                    credits_charged: cost,
                    balance,
                })
            }
            Err(err) => {
                self.refund(user_id, kind, cost, &err).await;
                Err(err)
            }
        }
    }

    async fn execute<T, F, Fut>(&self, work: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(work());
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(WorkError::Invalid(msg)))) => Err(GuardError::Invalid(msg)),
            Ok(Ok(Err(WorkError::Failed(msg)))) => Err(GuardError::Upstream(msg)),
            Ok(Err(join_error)) => Err(GuardError::Upstream(format!("work panicked: {join_error}"))),
            Err(_) => {
                abort.abort();
                Err(GuardError::TimedOut)
            }
        }
    }

    async fn settle(&self, user_id: UserId, kind: OperationKind, cost: i64) {
        if self.record_debits {
            let entry = CreditTransaction::usage(user_id, cost, kind.to_string());
            if let Err(e) = self.store.append_transaction(&entry).await {
                tracing::warn!(user_id = %user_id, operation = %kind, error = %e, "Failed to record usage entry");
            }
        }

        let first = match self.store.mark_first_operation(&user_id).await {
            Ok(first) => first,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to mark first operation");
                false
            }
        };

        // Rewarding is idempotent, so any success re-queues a reward an
        // earlier attempt failed to grant.
        if first || self.reward_outstanding(&user_id).await {
            self.side_effects.enqueue(SideEffect::ReferralCheck { user_id });
        }
    }

    async fn reward_outstanding(&self, user_id: &UserId) -> bool {
        match self.store.get_referral_for(user_id).await {
            Ok(referral) => referral.is_some_and(|r| !r.reward_granted),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to look up referral");
                true
            }
        }
    }

    async fn refund(&self, user_id: UserId, kind: OperationKind, cost: i64, cause: &GuardError) {
        match self.store.add(&user_id, cost).await {
            Ok(balance) => tracing::info!(
                user_id = %user_id,
                operation = %kind,
                credits = cost,
                new_balance = balance,
                cause = %cause,
                "Credits refunded after failed operation"
            ),
            Err(e) => tracing::error!(
                user_id = %user_id,
                operation = %kind,
                credits = cost,
                cause = %cause,
                error = %e,
                "Refund failed; balance needs manual reconciliation"
            ),
        }
    }
}
