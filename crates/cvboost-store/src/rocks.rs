//! `RocksDB` storage implementation.
//!
//! Values are CBOR-encoded. Every read-modify-write runs under a single write
//! lock and lands as one `WriteBatch`, which gives the conditional deduct and
//! the insert-if-absent credit their atomicity.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use cvboost_core::{
    normalize_code, Account, Coupon, CouponId, CouponRedemption, CreditTransaction, Referral,
    ReferralId, ReferralStatus, TransactionId, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{credit_session, ensure_positive, CreditOutcome, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_cf(&cf, key).map_err(db_err)?.is_some())
    }

    fn put<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(&cf, key, Self::serialize(value)?)
            .map_err(db_err)
    }

    /// Keys under `prefix` in ascending order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn load_account(&self, user_id: &UserId) -> Result<Account> {
        self.get(cf::ACCOUNTS, user_id.as_bytes())?
            .ok_or_else(|| StoreError::not_found("account", user_id))
    }

    fn load_coupon(&self, coupon_id: &CouponId) -> Result<Coupon> {
        self.get(cf::COUPONS, coupon_id.as_bytes())?
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))
    }

    fn load_referral(&self, referral_id: &ReferralId) -> Result<Referral> {
        self.get(cf::REFERRALS, referral_id.as_bytes())?
            .ok_or_else(|| StoreError::not_found("referral", referral_id))
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        self.get(cf::TRANSACTIONS, &transaction_id.to_bytes())
    }

    /// Add the transaction and its indexes to `batch`.
    fn batch_transaction(&self, batch: &mut WriteBatch, tx: &CreditTransaction) -> Result<()> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        batch.put_cf(&cf_tx, tx.id.to_bytes(), Self::serialize(tx)?);
        batch.put_cf(
            &cf_by_user,
            keys::user_transaction_key(&tx.user_id, &tx.id),
            [],
        );
        if let Some(session_id) = &tx.session_id {
            let cf_by_session = self.cf(cf::TRANSACTIONS_BY_SESSION)?;
            batch.put_cf(&cf_by_session, session_id.as_bytes(), tx.id.to_bytes());
        }
        Ok(())
    }

    /// Load, modify and rewrite one account under the write lock.
    fn update_account<F>(&self, user_id: &UserId, f: F) -> Result<Account>
    where
        F: FnOnce(&mut Account) -> Result<()>,
    {
        let _guard = self.lock();
        let mut account = self.load_account(user_id)?;
        f(&mut account)?;
        account.updated_at = Utc::now();
        self.put(cf::ACCOUNTS, user_id.as_bytes(), &account)?;
        Ok(account)
    }

    fn record_credit_sync(&self, tx: &CreditTransaction) -> Result<CreditOutcome> {
        let session_id = credit_session(tx)?;
        let _guard = self.lock();

        if self.exists(cf::TRANSACTIONS_BY_SESSION, session_id.as_bytes())? {
            return Ok(CreditOutcome::Duplicate);
        }
        let mut account = self.load_account(&tx.user_id)?;
        account.balance = account
            .balance
            .checked_add(tx.credits)
            .ok_or_else(|| StoreError::InvalidAmount("balance overflow".into()))?;
        account.updated_at = Utc::now();

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, tx.user_id.as_bytes(), Self::serialize(&account)?);
        self.batch_transaction(&mut batch, tx)?;
        self.db.write(batch).map_err(db_err)?;

        Ok(CreditOutcome::Credited {
            balance: account.balance,
        })
    }

    fn append_transaction_sync(&self, tx: &CreditTransaction) -> Result<()> {
        let _guard = self.lock();
        if let Some(session_id) = &tx.session_id {
            if self.exists(cf::TRANSACTIONS_BY_SESSION, session_id.as_bytes())? {
                return Err(StoreError::Conflict(format!(
                    "session already recorded: {session_id}"
                )));
            }
        }
        let mut batch = WriteBatch::default();
        self.batch_transaction(&mut batch, tx)?;
        self.db.write(batch).map_err(db_err)
    }

    fn list_transactions_sync(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let index = self.scan_prefix(cf::TRANSACTIONS_BY_USER, user_id.as_bytes())?;
        let mut transactions = Vec::new();
        for (key, _) in index.iter().rev().skip(offset).take(limit) {
            let tx_id = keys::transaction_id_from_user_key(key)?;
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    fn create_coupon_sync(&self, coupon: &Coupon) -> Result<()> {
        let code = normalize_code(&coupon.code);
        let _guard = self.lock();
        if self.exists(cf::COUPON_CODES, code.as_bytes())? {
            return Err(StoreError::Conflict(format!("coupon code exists: {code}")));
        }
        let cf_coupons = self.cf(cf::COUPONS)?;
        let cf_codes = self.cf(cf::COUPON_CODES)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_coupons, coupon.id.as_bytes(), Self::serialize(coupon)?);
        batch.put_cf(&cf_codes, code.as_bytes(), coupon.id.as_bytes());
        self.db.write(batch).map_err(db_err)
    }

    fn find_coupon_by_code_sync(&self, code: &str) -> Result<Option<Coupon>> {
        let cf_codes = self.cf(cf::COUPON_CODES)?;
        let Some(id_bytes) = self
            .db
            .get_cf(&cf_codes, normalize_code(code).as_bytes())
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        self.get(cf::COUPONS, &id_bytes)
    }

    fn list_coupons_sync(&self) -> Result<Vec<Coupon>> {
        let cf_coupons = self.cf(cf::COUPONS)?;
        let mut coupons = Vec::new();
        for item in self.db.iterator_cf(&cf_coupons, IteratorMode::Start) {
            let (_, value) = item.map_err(db_err)?;
            coupons.push(Self::deserialize::<Coupon>(&value)?);
        }
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    fn set_coupon_active_sync(&self, coupon_id: &CouponId, active: bool) -> Result<Coupon> {
        let _guard = self.lock();
        let mut coupon = self.load_coupon(coupon_id)?;
        coupon.active = active;
        self.put(cf::COUPONS, coupon_id.as_bytes(), &coupon)?;
        Ok(coupon)
    }

    fn delete_coupon_sync(&self, coupon_id: &CouponId) -> Result<()> {
        let _guard = self.lock();
        let coupon = self.load_coupon(coupon_id)?;
        let cf_coupons = self.cf(cf::COUPONS)?;
        let cf_codes = self.cf(cf::COUPON_CODES)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_coupons, coupon_id.as_bytes());
        batch.delete_cf(&cf_codes, coupon.code.as_bytes());
        self.db.write(batch).map_err(db_err)
    }

    fn settle_redemption_sync(&self, redemption: &CouponRedemption) -> Result<()> {
        let _guard = self.lock();
        let pair_key = keys::coupon_user_key(&redemption.coupon_id, &redemption.user_id);
        if self.exists(cf::REDEMPTIONS_BY_USER, &pair_key)? {
            return Err(StoreError::Conflict(format!(
                "coupon {} already redeemed by {}",
                redemption.coupon_id, redemption.user_id
            )));
        }
        let mut coupon = self.load_coupon(&redemption.coupon_id)?;
        if !coupon.has_capacity() {
            return Err(StoreError::CouponExhausted);
        }
        coupon.current_uses += 1;

        let cf_coupons = self.cf(cf::COUPONS)?;
        let cf_redemptions = self.cf(cf::REDEMPTIONS)?;
        let cf_by_user = self.cf(cf::REDEMPTIONS_BY_USER)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_coupons, coupon.id.as_bytes(), Self::serialize(&coupon)?);
        batch.put_cf(
            &cf_redemptions,
            keys::pair(redemption.coupon_id.as_bytes(), redemption.id.as_bytes()),
            Self::serialize(redemption)?,
        );
        batch.put_cf(&cf_by_user, pair_key, redemption.id.as_bytes());
        self.db.write(batch).map_err(db_err)
    }

    fn list_redemptions_sync(&self, coupon_id: &CouponId) -> Result<Vec<CouponRedemption>> {
        let mut redemptions = self
            .scan_prefix(cf::REDEMPTIONS, coupon_id.as_bytes())?
            .iter()
            .map(|(_, value)| Self::deserialize::<CouponRedemption>(value))
            .collect::<Result<Vec<_>>>()?;
        redemptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(redemptions)
    }

    fn create_referral_sync(&self, referral: &Referral) -> Result<bool> {
        let _guard = self.lock();
        if self.exists(cf::REFERRALS_BY_REFERRED, referral.referred_id.as_bytes())? {
            return Ok(false);
        }
        let cf_referrals = self.cf(cf::REFERRALS)?;
        let cf_by_referred = self.cf(cf::REFERRALS_BY_REFERRED)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_referrals, referral.id.as_bytes(), Self::serialize(referral)?);
        batch.put_cf(
            &cf_by_referred,
            referral.referred_id.as_bytes(),
            referral.id.as_bytes(),
        );
        self.db.write(batch).map_err(db_err)?;
        Ok(true)
    }

    fn get_referral_for_sync(&self, referred_id: &UserId) -> Result<Option<Referral>> {
        let cf_by_referred = self.cf(cf::REFERRALS_BY_REFERRED)?;
        let Some(id_bytes) = self
            .db
            .get_cf(&cf_by_referred, referred_id.as_bytes())
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        self.get(cf::REFERRALS, &id_bytes)
    }

    fn update_referral<F>(&self, referral_id: &ReferralId, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Referral) -> bool,
    {
        let _guard = self.lock();
        let mut referral = self.load_referral(referral_id)?;
        if !f(&mut referral) {
            return Ok(false);
        }
        self.put(cf::REFERRALS, referral_id.as_bytes(), &referral)?;
        Ok(true)
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn create_account(&self, account: &Account) -> Result<bool> {
        let _guard = self.lock();
        if self.exists(cf::ACCOUNTS, account.user_id.as_bytes())? {
            return Ok(false);
        }
        self.put(cf::ACCOUNTS, account.user_id.as_bytes(), account)?;
        Ok(true)
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, user_id.as_bytes())
    }

    async fn set_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        self.update_account(user_id, |account| {
            account.customer_id = Some(customer_id.to_string());
            Ok(())
        })?;
        Ok(())
    }

    async fn deduct(&self, user_id: &UserId, credits: i64) -> Result<i64> {
        ensure_positive(credits)?;
        let account = self.update_account(user_id, |account| {
            if account.balance < credits {
                return Err(StoreError::InsufficientCredits {
                    balance: account.balance,
                    required: credits,
                });
            }
            account.balance -= credits;
            Ok(())
        })?;
        Ok(account.balance)
    }

    async fn add(&self, user_id: &UserId, credits: i64) -> Result<i64> {
        ensure_positive(credits)?;
        let account = self.update_account(user_id, |account| {
            account.balance = account
                .balance
                .checked_add(credits)
                .ok_or_else(|| StoreError::InvalidAmount("balance overflow".into()))?;
            Ok(())
        })?;
        Ok(account.balance)
    }

    async fn mark_first_operation(&self, user_id: &UserId) -> Result<bool> {
        let mut first = false;
        self.update_account(user_id, |account| {
            if account.first_operation_at.is_none() {
                account.first_operation_at = Some(Utc::now());
                first = true;
            }
            Ok(())
        })?;
        Ok(first)
    }

    async fn record_credit(&self, transaction: &CreditTransaction) -> Result<CreditOutcome> {
        self.record_credit_sync(transaction)
    }

    async fn append_transaction(&self, transaction: &CreditTransaction) -> Result<()> {
        self.append_transaction_sync(transaction)
    }

    async fn get_transaction_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CreditTransaction>> {
        let cf_by_session = self.cf(cf::TRANSACTIONS_BY_SESSION)?;
        let Some(id_bytes) = self
            .db
            .get_cf(&cf_by_session, session_id.as_bytes())
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        self.get(cf::TRANSACTIONS, &id_bytes)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        self.list_transactions_sync(user_id, limit, offset)
    }

    async fn create_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.create_coupon_sync(coupon)
    }

    async fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>> {
        self.get(cf::COUPONS, coupon_id.as_bytes())
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        self.find_coupon_by_code_sync(code)
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>> {
        self.list_coupons_sync()
    }

    async fn set_coupon_active(&self, coupon_id: &CouponId, active: bool) -> Result<Coupon> {
        self.set_coupon_active_sync(coupon_id, active)
    }

    async fn delete_coupon(&self, coupon_id: &CouponId) -> Result<()> {
        self.delete_coupon_sync(coupon_id)
    }

    async fn has_redemption(&self, coupon_id: &CouponId, user_id: &UserId) -> Result<bool> {
        self.exists(
            cf::REDEMPTIONS_BY_USER,
            &keys::coupon_user_key(coupon_id, user_id),
        )
    }

    async fn settle_redemption(&self, redemption: &CouponRedemption) -> Result<()> {
        self.settle_redemption_sync(redemption)
    }

    async fn list_redemptions(&self, coupon_id: &CouponId) -> Result<Vec<CouponRedemption>> {
        self.list_redemptions_sync(coupon_id)
    }

    async fn create_referral(&self, referral: &Referral) -> Result<bool> {
        self.create_referral_sync(referral)
    }

    async fn get_referral_for(&self, referred_id: &UserId) -> Result<Option<Referral>> {
        self.get_referral_for_sync(referred_id)
    }

    async fn complete_referral(&self, referral_id: &ReferralId) -> Result<bool> {
        self.update_referral(referral_id, |referral| {
            if referral.status != ReferralStatus::Pending {
                return false;
            }
            referral.status = ReferralStatus::Completed;
            true
        })
    }

    async fn mark_referral_rewarded(&self, referral_id: &ReferralId) -> Result<()> {
        self.update_referral(referral_id, |referral| {
            referral.reward_granted = true;
            true
        })?;
        Ok(())
    }
}
