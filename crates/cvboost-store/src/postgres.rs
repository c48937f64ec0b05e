//! PostgreSQL storage implementation.
//!
//! Atomicity comes from the database: balance changes are conditional
//! single-statement updates, and compound writes (`record_credit`,
//! `settle_redemption`) run inside one transaction guarded by unique
//! constraints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use cvboost_core::{
    normalize_code, Account, Coupon, CouponId, CouponRedemption, CreditTransaction, DiscountType,
    RedemptionId, Referral, ReferralId, ReferralStatus, TransactionId, TransactionType, UserId,
};

use crate::error::{Result, StoreError};
use crate::{credit_session, ensure_positive, CreditOutcome, Store};

const ACCOUNT_COLUMNS: &str =
    "user_id, balance, customer_id, first_operation_at, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, credits, price_paid_cents, transaction_type, description, session_id, created_at";
const COUPON_COLUMNS: &str = "id, code, discount_type, discount_value, max_uses, \
     min_purchase_cents, expires_at, active, current_uses, created_at";
const REDEMPTION_COLUMNS: &str =
    "id, coupon_id, coupon_code, user_id, transaction_id, discount_cents, created_at";
const REFERRAL_COLUMNS: &str =
    "id, referrer_id, referred_id, status, reward_granted, created_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url` and run embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and run embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("postgres migrations applied");
        Ok(Self { pool })
    }

    async fn current_balance(&self, user_id: &UserId) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT balance FROM accounts WHERE user_id = $1")
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<i64, _>("balance").map_err(StoreError::from))
            .transpose()
    }
}

fn decode_account(row: &PgRow) -> Result<Account> {
    Ok(Account {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        balance: row.try_get("balance")?,
        customer_id: row.try_get("customer_id")?,
        first_operation_at: row.try_get("first_operation_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_transaction(row: &PgRow) -> Result<CreditTransaction> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("transaction_type")?;
    Ok(CreditTransaction {
        id: id
            .parse::<TransactionId>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        credits: row.try_get("credits")?,
        price_paid_cents: row.try_get("price_paid_cents")?,
        transaction_type: TransactionType::parse(&kind)
            .ok_or_else(|| StoreError::Serialization(format!("unknown transaction type: {kind}")))?,
        description: row.try_get("description")?,
        session_id: row.try_get("session_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_coupon(row: &PgRow) -> Result<Coupon> {
    let kind: String = row.try_get("discount_type")?;
    Ok(Coupon {
        id: CouponId::from_uuid(row.try_get("id")?),
        code: row.try_get("code")?,
        discount_type: DiscountType::parse(&kind)
            .ok_or_else(|| StoreError::Serialization(format!("unknown discount type: {kind}")))?,
        discount_value: row.try_get("discount_value")?,
        max_uses: row.try_get("max_uses")?,
        min_purchase_cents: row.try_get("min_purchase_cents")?,
        expires_at: row.try_get::<Option<DateTime<Utc>>, _>("expires_at")?,
        active: row.try_get("active")?,
        current_uses: row.try_get("current_uses")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_redemption(row: &PgRow) -> Result<CouponRedemption> {
    let transaction_id: String = row.try_get("transaction_id")?;
    Ok(CouponRedemption {
        id: RedemptionId::from_uuid(row.try_get("id")?),
        coupon_id: CouponId::from_uuid(row.try_get("coupon_id")?),
        coupon_code: row.try_get("coupon_code")?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        transaction_id: transaction_id
            .parse()
            .map_err(|e: cvboost_core::IdError| StoreError::Serialization(e.to_string()))?,
        discount_cents: row.try_get("discount_cents")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_referral(row: &PgRow) -> Result<Referral> {
    let status: String = row.try_get("status")?;
    Ok(Referral {
        id: ReferralId::from_uuid(row.try_get("id")?),
        referrer_id: UserId::from_uuid(row.try_get("referrer_id")?),
        referred_id: UserId::from_uuid(row.try_get("referred_id")?),
        status: ReferralStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown referral status: {status}")))?,
        reward_granted: row.try_get("reward_granted")?,
        created_at: row.try_get("created_at")?,
    })
}

fn page(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn insert_transaction_sql(on_conflict: &str) -> String {
    format!(
        "INSERT INTO credit_transactions ({TRANSACTION_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) {on_conflict}"
    )
}

fn bind_transaction<'q>(
    sql: &'q str,
    tx: &'q CreditTransaction,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(sql)
        .bind(tx.id.to_string())
        .bind(*tx.user_id.as_uuid())
        .bind(tx.credits)
        .bind(tx.price_paid_cents)
        .bind(tx.transaction_type.as_str())
        .bind(tx.description.as_deref())
        .bind(tx.session_id.as_deref())
        .bind(tx.created_at)
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id) DO NOTHING"
        ))
        .bind(*account.user_id.as_uuid())
        .bind(account.balance)
        .bind(account.customer_id.as_deref())
        .bind(account.first_operation_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1"
        ))
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_account).transpose()
    }

    async fn set_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE accounts SET customer_id = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(*user_id.as_uuid())
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("account", user_id));
        }
        Ok(())
    }

    async fn deduct(&self, user_id: &UserId, credits: i64) -> Result<i64> {
        ensure_positive(credits)?;
        let row = sqlx::query(
            "UPDATE accounts SET balance = balance - $2, updated_at = NOW() \
             WHERE user_id = $1 AND balance >= $2 RETURNING balance",
        )
        .bind(*user_id.as_uuid())
        .bind(credits)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(row.try_get("balance")?);
        }
        match self.current_balance(user_id).await? {
            Some(balance) => Err(StoreError::InsufficientCredits {
                balance,
                required: credits,
            }),
            None => Err(StoreError::not_found("account", user_id)),
        }
    }

    async fn add(&self, user_id: &UserId, credits: i64) -> Result<i64> {
        ensure_positive(credits)?;
        let row = sqlx::query(
            "UPDATE accounts SET balance = balance + $2, updated_at = NOW() \
             WHERE user_id = $1 RETURNING balance",
        )
        .bind(*user_id.as_uuid())
        .bind(credits)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("account", user_id))?;
        Ok(row.try_get("balance")?)
    }

    async fn mark_first_operation(&self, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET first_operation_at = NOW(), updated_at = NOW() \
             WHERE user_id = $1 AND first_operation_at IS NULL",
        )
        .bind(*user_id.as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.current_balance(user_id).await?.is_none() {
            return Err(StoreError::not_found("account", user_id));
        }
        Ok(false)
    }

    async fn record_credit(&self, transaction: &CreditTransaction) -> Result<CreditOutcome> {
        credit_session(transaction)?;
        let mut db_tx = self.pool.begin().await?;

        let sql = insert_transaction_sql("ON CONFLICT (session_id) DO NOTHING");
        let inserted = bind_transaction(&sql, transaction)
            .execute(&mut *db_tx)
            .await?
            .rows_affected();
        if inserted == 0 {
            db_tx.rollback().await?;
            return Ok(CreditOutcome::Duplicate);
        }

        let row = sqlx::query(
            "UPDATE accounts SET balance = balance + $2, updated_at = NOW() \
             WHERE user_id = $1 RETURNING balance",
        )
        .bind(*transaction.user_id.as_uuid())
        .bind(transaction.credits)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Err(StoreError::not_found("account", transaction.user_id));
        };
        let balance: i64 = row.try_get("balance")?;
        db_tx.commit().await?;

        Ok(CreditOutcome::Credited { balance })
    }

    async fn append_transaction(&self, transaction: &CreditTransaction) -> Result<()> {
        let sql = insert_transaction_sql("ON CONFLICT DO NOTHING");
        let inserted = bind_transaction(&sql, transaction)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if inserted == 0 {
            return Err(StoreError::Conflict(format!(
                "transaction already recorded: {}",
                transaction.id
            )));
        }
        Ok(())
    }

    async fn get_transaction_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CreditTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_transaction).transpose()
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions \
             WHERE user_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(*user_id.as_uuid())
        .bind(page(limit))
        .bind(page(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_transaction).collect()
    }

    async fn create_coupon(&self, coupon: &Coupon) -> Result<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO coupons ({COUPON_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ON CONFLICT DO NOTHING"
        ))
        .bind(*coupon.id.as_uuid())
        .bind(normalize_code(&coupon.code))
        .bind(coupon.discount_type.as_str())
        .bind(coupon.discount_value)
        .bind(coupon.max_uses)
        .bind(coupon.min_purchase_cents)
        .bind(coupon.expires_at)
        .bind(coupon.active)
        .bind(coupon.current_uses)
        .bind(coupon.created_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "coupon code exists: {}",
                coupon.code
            )));
        }
        Ok(())
    }

    async fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>> {
        let row = sqlx::query(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1"))
            .bind(*coupon_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_coupon).transpose()
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1"
        ))
        .bind(normalize_code(code))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_coupon).transpose()
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>> {
        let rows = sqlx::query(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_coupon).collect()
    }

    async fn set_coupon_active(&self, coupon_id: &CouponId, active: bool) -> Result<Coupon> {
        let row = sqlx::query(&format!(
            "UPDATE coupons SET active = $2 WHERE id = $1 RETURNING {COUPON_COLUMNS}"
        ))
        .bind(*coupon_id.as_uuid())
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("coupon", coupon_id))?;
        decode_coupon(&row)
    }

    async fn delete_coupon(&self, coupon_id: &CouponId) -> Result<()> {
        let result = sqlx::query("DELETE FROM coupons WHERE id = $1")
            .bind(*coupon_id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("coupon", coupon_id));
        }
        Ok(())
    }

    async fn has_redemption(&self, coupon_id: &CouponId, user_id: &UserId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS found FROM coupon_redemptions WHERE coupon_id = $1 AND user_id = $2",
        )
        .bind(*coupon_id.as_uuid())
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn settle_redemption(&self, redemption: &CouponRedemption) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO coupon_redemptions ({REDEMPTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (coupon_id, user_id) DO NOTHING"
        ))
        .bind(*redemption.id.as_uuid())
        .bind(*redemption.coupon_id.as_uuid())
        .bind(&redemption.coupon_code)
        .bind(*redemption.user_id.as_uuid())
        .bind(redemption.transaction_id.to_string())
        .bind(redemption.discount_cents)
        .bind(redemption.created_at)
        .execute(&mut *db_tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            db_tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "coupon {} already redeemed by {}",
                redemption.coupon_id, redemption.user_id
            )));
        }

        let bumped = sqlx::query(
            "UPDATE coupons SET current_uses = current_uses + 1 \
             WHERE id = $1 AND (max_uses IS NULL OR current_uses < max_uses)",
        )
        .bind(*redemption.coupon_id.as_uuid())
        .execute(&mut *db_tx)
        .await?
        .rows_affected();
        if bumped == 0 {
            let exists = sqlx::query("SELECT 1 AS found FROM coupons WHERE id = $1")
                .bind(*redemption.coupon_id.as_uuid())
                .fetch_optional(&mut *db_tx)
                .await?
                .is_some();
            db_tx.rollback().await?;
            return Err(if exists {
                StoreError::CouponExhausted
            } else {
                StoreError::not_found("coupon", redemption.coupon_id)
            });
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn list_redemptions(&self, coupon_id: &CouponId) -> Result<Vec<CouponRedemption>> {
        let rows = sqlx::query(&format!(
            "SELECT {REDEMPTION_COLUMNS} FROM coupon_redemptions \
             WHERE coupon_id = $1 ORDER BY created_at DESC"
        ))
        .bind(*coupon_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_redemption).collect()
    }

    async fn create_referral(&self, referral: &Referral) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO referrals ({REFERRAL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (referred_id) DO NOTHING"
        ))
        .bind(*referral.id.as_uuid())
        .bind(*referral.referrer_id.as_uuid())
        .bind(*referral.referred_id.as_uuid())
        .bind(referral.status.as_str())
        .bind(referral.reward_granted)
        .bind(referral.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_referral_for(&self, referred_id: &UserId) -> Result<Option<Referral>> {
        let row = sqlx::query(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM referrals WHERE referred_id = $1"
        ))
        .bind(*referred_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_referral).transpose()
    }

    async fn complete_referral(&self, referral_id: &ReferralId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE referrals SET status = 'completed' WHERE id = $1 AND status = 'pending'",
        )
        .bind(*referral_id.as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 AS found FROM referrals WHERE id = $1")
            .bind(*referral_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StoreError::not_found("referral", referral_id))
        }
    }

    async fn mark_referral_rewarded(&self, referral_id: &ReferralId) -> Result<()> {
        let result = sqlx::query("UPDATE referrals SET reward_granted = TRUE WHERE id = $1")
            .bind(*referral_id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("referral", referral_id));
        }
        Ok(())
    }
}
