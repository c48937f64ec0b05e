//! Storage layer for the cvboost credit ledger.
//!
//! This crate defines the [`Store`] trait, the single contract every other
//! component reads and writes balances through, and three backends:
//!
//! - [`MemoryStore`]: mutex-guarded maps, used by tests and local development
//! - [`PgStore`]: PostgreSQL via `sqlx`, conditional updates and `ON CONFLICT`
//! - `RocksStore`: `RocksDB` column families with CBOR values (feature
//!   `rocksdb-backend`)
//!
//! # Atomicity
//!
//! Every balance mutation is a single atomic operation in the backend:
//!
//! - `deduct` is a conditional decrement and never goes below zero
//! - `record_credit` inserts the ledger entry (unique by session id) and
//!   increments the balance together, or does neither
//! - `settle_redemption` bumps the coupon counter (respecting `max_uses`) and
//!   writes the redemption together, or does neither
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> cvboost_store::Result<()> {
//! use cvboost_core::{Account, UserId};
//! use cvboost_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! store.create_account(&Account::new(user_id, 3)).await?;
//!
//! let balance = store.deduct(&user_id, 1).await?;
//! assert_eq!(balance, 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use cvboost_core::{
    Account, Coupon, CouponId, CouponRedemption, CreditTransaction, Referral, ReferralId, UserId,
};

/// Result of an idempotent credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// The transaction was written and the balance increased.
    Credited {
        /// Balance after the credit.
        balance: i64,
    },

    /// A transaction with the same session id already exists. Nothing changed.
    Duplicate,
}

/// The storage trait defining all ledger operations.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert an account if none exists for the user.
    ///
    /// Returns `true` if the account was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_account(&self, account: &Account) -> Result<bool>;

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    /// Attach a payment processor customer ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn set_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<()>;

    /// Atomically subtract `credits` if the balance covers it.
    ///
    /// Returns the new balance. On `InsufficientCredits` nothing changed.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientCredits` if balance is too low.
    /// - `StoreError::InvalidAmount` if `credits` is not positive.
    async fn deduct(&self, user_id: &UserId, credits: i64) -> Result<i64>;

    /// Atomically add `credits`.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InvalidAmount` if `credits` is not positive or the
    ///   balance would overflow.
    async fn add(&self, user_id: &UserId, credits: i64) -> Result<i64>;

    /// Set the first-operation timestamp if it is still unset.
    ///
    /// Returns `true` only for the call that set it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn mark_first_operation(&self, user_id: &UserId) -> Result<bool>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Write a session-keyed credit transaction and apply its credits, once.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InvalidAmount` if the transaction has no session id or
    ///   non-positive credits.
    async fn record_credit(&self, transaction: &CreditTransaction) -> Result<CreditOutcome>;

    /// Append a transaction without touching the balance.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if its session id is already used.
    async fn append_transaction(&self, transaction: &CreditTransaction) -> Result<()>;

    /// Look up a transaction by external session id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transaction_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CreditTransaction>>;

    /// List transactions for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    /// Insert a coupon.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the code is taken.
    async fn create_coupon(&self, coupon: &Coupon) -> Result<()>;

    /// Get a coupon by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>>;

    /// Find a coupon by code (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>>;

    /// List all coupons, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_coupons(&self) -> Result<Vec<Coupon>>;

    /// Enable or disable a coupon and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the coupon doesn't exist.
    async fn set_coupon_active(&self, coupon_id: &CouponId, active: bool) -> Result<Coupon>;

    /// Delete a coupon. Its redemptions are kept.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the coupon doesn't exist.
    async fn delete_coupon(&self, coupon_id: &CouponId) -> Result<()>;

    /// Check whether the user already redeemed the coupon.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn has_redemption(&self, coupon_id: &CouponId, user_id: &UserId) -> Result<bool>;

    /// Increment the coupon's use counter and record the redemption together.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the coupon doesn't exist.
    /// - `StoreError::CouponExhausted` if `max_uses` is reached.
    /// - `StoreError::Conflict` if the user already redeemed this coupon.
    async fn settle_redemption(&self, redemption: &CouponRedemption) -> Result<()>;

    /// List redemptions of a coupon, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_redemptions(&self, coupon_id: &CouponId) -> Result<Vec<CouponRedemption>>;

    // =========================================================================
    // Referral Operations
    // =========================================================================

    /// Insert a referral unless the referred user already has one.
    ///
    /// Returns `true` if it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_referral(&self, referral: &Referral) -> Result<bool>;

    /// Get the referral that brought in `referred_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_referral_for(&self, referred_id: &UserId) -> Result<Option<Referral>>;

    /// Move a referral from pending to completed.
    ///
    /// Returns `true` only for the call that made the transition.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the referral doesn't exist.
    async fn complete_referral(&self, referral_id: &ReferralId) -> Result<bool>;

    /// Flag a referral's rewards as granted.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the referral doesn't exist.
    async fn mark_referral_rewarded(&self, referral_id: &ReferralId) -> Result<()>;
}

/// Reject non-positive amounts before they reach a backend.
pub(crate) fn ensure_positive(credits: i64) -> Result<()> {
    if credits <= 0 {
        return Err(StoreError::InvalidAmount(format!(
            "credits must be positive, got {credits}"
        )));
    }
    Ok(())
}

/// Validate a transaction passed to `record_credit` and return its session id.
pub(crate) fn credit_session(transaction: &CreditTransaction) -> Result<&str> {
    ensure_positive(transaction.credits)?;
    transaction
        .session_id
        .as_deref()
        .ok_or_else(|| StoreError::InvalidAmount("credit transaction has no session id".into()))
}
