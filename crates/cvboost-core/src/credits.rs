//! Credit transaction types.
//!
//! Transactions form an append-only ledger. Purchases and referral rewards are
//! always recorded; debits for metered operations are only recorded when debit
//! auditing is switched on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ReferralId, ReferralRole, TransactionId, UserId};

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Credits. Positive = grant, negative = debit.
    pub credits: i64,

    /// Real money paid in minor units (zero for non-purchase grants).
    pub price_paid_cents: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Human-readable description.
    pub description: Option<String>,

    /// External session identifier. Unique when present; this is the
    /// idempotency key for crediting.
    pub session_id: Option<String>,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Create a purchase transaction for a confirmed checkout session.
    #[must_use]
    pub fn purchase(
        user_id: UserId,
        credits: i64,
        price_paid_cents: i64,
        session_id: impl Into<String>,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            credits,
            price_paid_cents,
            transaction_type: TransactionType::Purchase,
            description: Some(description),
            session_id: Some(session_id.into()),
            created_at: Utc::now(),
        }
    }

    /// Create a referral reward grant.
    ///
    /// The session id is derived from the referral and the side being
    /// rewarded, so replays of the same reward collapse onto one entry.
    #[must_use]
    pub fn referral_reward(
        user_id: UserId,
        credits: i64,
        referral_id: ReferralId,
        role: ReferralRole,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            credits,
            price_paid_cents: 0,
            transaction_type: TransactionType::ReferralReward,
            description: Some(format!("Referral reward ({})", role.as_str())),
            session_id: Some(format!("referral:{referral_id}:{}", role.as_str())),
            created_at: Utc::now(),
        }
    }

    /// Create a usage (debit) audit entry.
    #[must_use]
    pub fn usage(user_id: UserId, credits: i64, description: String) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            credits: -credits.abs(),
            price_paid_cents: 0,
            transaction_type: TransactionType::Usage,
            description: Some(description),
            session_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits bought through the payment processor.
    Purchase,

    /// Credits granted for a completed referral.
    ReferralReward,

    /// Credits spent on a metered operation.
    Usage,
}

impl TransactionType {
    /// Database/wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::ReferralReward => "referral_reward",
            Self::Usage => "usage",
        }
    }

    /// Parse the database/wire name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "purchase" => Some(Self::Purchase),
            "referral_reward" => Some(Self::ReferralReward),
            "usage" => Some(Self::Usage),
            _ => None,
        }
    }

    /// Check if this transaction type adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Purchase | Self::ReferralReward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_transaction_carries_session() {
        let user_id = UserId::generate();
        let tx = CreditTransaction::purchase(user_id, 10, 720, "cs_test_1", "10 credits".into());

        assert_eq!(tx.credits, 10);
        assert_eq!(tx.price_paid_cents, 720);
        assert_eq!(tx.session_id.as_deref(), Some("cs_test_1"));
        assert_eq!(tx.transaction_type, TransactionType::Purchase);
    }

    #[test]
    fn usage_transaction_is_negative() {
        let tx = CreditTransaction::usage(UserId::generate(), 2, "search_jobs".into());

        assert_eq!(tx.credits, -2);
        assert_eq!(tx.price_paid_cents, 0);
        assert!(tx.session_id.is_none());
        assert!(!tx.transaction_type.is_credit());
    }

    #[test]
    fn referral_reward_keys_are_deterministic() {
        let referral_id = ReferralId::generate();
        let a = CreditTransaction::referral_reward(
            UserId::generate(),
            2,
            referral_id,
            ReferralRole::Referrer,
        );
        let b = CreditTransaction::referral_reward(
            UserId::generate(),
            2,
            referral_id,
            ReferralRole::Referrer,
        );
        let c = CreditTransaction::referral_reward(
            UserId::generate(),
            2,
            referral_id,
            ReferralRole::Referred,
        );

        assert_eq!(a.session_id, b.session_id);
        assert_ne!(a.session_id, c.session_id);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn transaction_type_names_roundtrip() {
        for ty in [
            TransactionType::Purchase,
            TransactionType::ReferralReward,
            TransactionType::Usage,
        ] {
            assert_eq!(TransactionType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(TransactionType::parse("bonus"), None);
    }
}
