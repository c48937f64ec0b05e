//! Account types.
//!
//! An account holds the spendable credit balance for one user. The balance is
//! only ever changed through the store's atomic `add`/`deduct` primitives; the
//! struct here is a read model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Credits granted to every new account at signup.
pub const DEFAULT_SIGNUP_GRANT_CREDITS: i64 = 3;

/// A credit account for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user ID.
    pub user_id: UserId,

    /// Current spendable credits. Never negative.
    pub balance: i64,

    /// Payment processor customer ID, if one was created.
    pub customer_id: Option<String>,

    /// When the user's first metered operation succeeded.
    ///
    /// Set exactly once; drives referral completion.
    pub first_operation_at: Option<DateTime<Utc>>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account holding the signup grant.
    #[must_use]
    pub fn new(user_id: UserId, signup_grant: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: signup_grant.max(0),
            customer_id: None,
            first_operation_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover `credits`.
    #[must_use]
    pub fn has_sufficient_credits(&self, credits: i64) -> bool {
        self.balance >= credits
    }
}
