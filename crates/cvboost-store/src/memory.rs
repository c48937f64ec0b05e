//! In-memory storage implementation.
//!
//! All state sits behind one mutex, so every compound operation is trivially
//! atomic. Used by tests and local development; data is lost on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use cvboost_core::{
    normalize_code, Account, Coupon, CouponId, CouponRedemption, CreditTransaction, Referral,
    ReferralId, ReferralStatus, UserId,
};

use crate::error::{Result, StoreError};
use crate::{credit_session, ensure_positive, CreditOutcome, Store};

#[derive(Default)]
struct Inner {
    accounts: HashMap<UserId, Account>,
    /// Append order is creation order.
    transactions: Vec<CreditTransaction>,
    sessions: HashMap<String, usize>,
    coupons: HashMap<CouponId, Coupon>,
    coupon_codes: HashMap<String, CouponId>,
    redemptions: Vec<CouponRedemption>,
    referrals: HashMap<ReferralId, Referral>,
    referral_by_referred: HashMap<UserId, ReferralId>,
}

impl Inner {
    fn account_mut(&mut self, user_id: &UserId) -> Result<&mut Account> {
        self.accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found("account", user_id))
    }

    fn push_transaction(&mut self, transaction: &CreditTransaction) {
        if let Some(session_id) = &transaction.session_id {
            self.sessions
                .insert(session_id.clone(), self.transactions.len());
        }
        self.transactions.push(transaction.clone());
    }
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic mid-operation never leaves a half-applied write behind:
        // every method validates before it mutates.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<bool> {
        let mut inner = self.lock();
        if inner.accounts.contains_key(&account.user_id) {
            return Ok(false);
        }
        inner.accounts.insert(account.user_id, account.clone());
        Ok(true)
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        Ok(self.lock().accounts.get(user_id).cloned())
    }

    async fn set_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let account = inner.account_mut(user_id)?;
        account.customer_id = Some(customer_id.to_string());
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn deduct(&self, user_id: &UserId, credits: i64) -> Result<i64> {
        ensure_positive(credits)?;
        let mut inner = self.lock();
        let account = inner.account_mut(user_id)?;
        if account.balance < credits {
            return Err(StoreError::InsufficientCredits {
                balance: account.balance,
                required: credits,
            });
        }
        account.balance -= credits;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }

    async fn add(&self, user_id: &UserId, credits: i64) -> Result<i64> {
        ensure_positive(credits)?;
        let mut inner = self.lock();
        let account = inner.account_mut(user_id)?;
        account.balance = account
            .balance
            .checked_add(credits)
            .ok_or_else(|| StoreError::InvalidAmount("balance overflow".into()))?;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }

    async fn mark_first_operation(&self, user_id: &UserId) -> Result<bool> {
        let mut inner = self.lock();
        let account = inner.account_mut(user_id)?;
        if account.first_operation_at.is_some() {
            return Ok(false);
        }
        let now = Utc::now();
        account.first_operation_at = Some(now);
        account.updated_at = now;
        Ok(true)
    }

    async fn record_credit(&self, transaction: &CreditTransaction) -> Result<CreditOutcome> {
        let session_id = credit_session(transaction)?;
        let mut inner = self.lock();
        if inner.sessions.contains_key(session_id) {
            return Ok(CreditOutcome::Duplicate);
        }

        let account = inner.account_mut(&transaction.user_id)?;
        let balance = account
            .balance
            .checked_add(transaction.credits)
            .ok_or_else(|| StoreError::InvalidAmount("balance overflow".into()))?;
        account.balance = balance;
        account.updated_at = Utc::now();
        inner.push_transaction(transaction);

        Ok(CreditOutcome::Credited { balance })
    }

    async fn append_transaction(&self, transaction: &CreditTransaction) -> Result<()> {
        let mut inner = self.lock();
        if let Some(session_id) = &transaction.session_id {
            if inner.sessions.contains_key(session_id) {
                return Err(StoreError::Conflict(format!(
                    "session already recorded: {session_id}"
                )));
            }
        }
        inner.push_transaction(transaction);
        Ok(())
    }

    async fn get_transaction_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CreditTransaction>> {
        let inner = self.lock();
        Ok(inner
            .sessions
            .get(session_id)
            .and_then(|&idx| inner.transactions.get(idx))
            .cloned())
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.lock();
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|tx| &tx.user_id == user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut inner = self.lock();
        let code = normalize_code(&coupon.code);
        if inner.coupon_codes.contains_key(&code) {
            return Err(StoreError::Conflict(format!("coupon code exists: {code}")));
        }
        inner.coupon_codes.insert(code, coupon.id);
        inner.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>> {
        Ok(self.lock().coupons.get(coupon_id).cloned())
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let inner = self.lock();
        Ok(inner
            .coupon_codes
            .get(&normalize_code(code))
            .and_then(|id| inner.coupons.get(id))
            .cloned())
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>> {
        let mut coupons: Vec<Coupon> = self.lock().coupons.values().cloned().collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    async fn set_coupon_active(&self, coupon_id: &CouponId, active: bool) -> Result<Coupon> {
        let mut inner = self.lock();
        let coupon = inner
            .coupons
            .get_mut(coupon_id)
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))?;
        coupon.active = active;
        Ok(coupon.clone())
    }

    async fn delete_coupon(&self, coupon_id: &CouponId) -> Result<()> {
        let mut inner = self.lock();
        let coupon = inner
            .coupons
            .remove(coupon_id)
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))?;
        inner.coupon_codes.remove(&coupon.code);
        Ok(())
    }

    async fn has_redemption(&self, coupon_id: &CouponId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .lock()
            .redemptions
            .iter()
            .any(|r| &r.coupon_id == coupon_id && &r.user_id == user_id))
    }

    async fn settle_redemption(&self, redemption: &CouponRedemption) -> Result<()> {
        let mut inner = self.lock();
        if inner
            .redemptions
            .iter()
            .any(|r| r.coupon_id == redemption.coupon_id && r.user_id == redemption.user_id)
        {
            return Err(StoreError::Conflict(format!(
                "coupon {} already redeemed by {}",
                redemption.coupon_id, redemption.user_id
            )));
        }

        let coupon = inner
            .coupons
            .get_mut(&redemption.coupon_id)
            .ok_or_else(|| StoreError::not_found("coupon", redemption.coupon_id))?;
        if !coupon.has_capacity() {
            return Err(StoreError::CouponExhausted);
        }
        coupon.current_uses += 1;
        inner.redemptions.push(redemption.clone());
        Ok(())
    }

    async fn list_redemptions(&self, coupon_id: &CouponId) -> Result<Vec<CouponRedemption>> {
        Ok(self
            .lock()
            .redemptions
            .iter()
            .rev()
            .filter(|r| &r.coupon_id == coupon_id)
            .cloned()
            .collect())
    }

    async fn create_referral(&self, referral: &Referral) -> Result<bool> {
        let mut inner = self.lock();
        if inner
            .referral_by_referred
            .contains_key(&referral.referred_id)
        {
            return Ok(false);
        }
        inner
            .referral_by_referred
            .insert(referral.referred_id, referral.id);
        inner.referrals.insert(referral.id, referral.clone());
        Ok(true)
    }

    async fn get_referral_for(&self, referred_id: &UserId) -> Result<Option<Referral>> {
        let inner = self.lock();
        Ok(inner
            .referral_by_referred
            .get(referred_id)
            .and_then(|id| inner.referrals.get(id))
            .cloned())
    }

    async fn complete_referral(&self, referral_id: &ReferralId) -> Result<bool> {
        let mut inner = self.lock();
        let referral = inner
            .referrals
            .get_mut(referral_id)
            .ok_or_else(|| StoreError::not_found("referral", referral_id))?;
        if referral.status != ReferralStatus::Pending {
            return Ok(false);
        }
        referral.status = ReferralStatus::Completed;
        Ok(true)
    }

    async fn mark_referral_rewarded(&self, referral_id: &ReferralId) -> Result<()> {
        let mut inner = self.lock();
        let referral = inner
            .referrals
            .get_mut(referral_id)
            .ok_or_else(|| StoreError::not_found("referral", referral_id))?;
        referral.reward_granted = true;
        Ok(())
    }
}
