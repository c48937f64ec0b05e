//! Column families for the `RocksDB` backend.

/// Column family names.
pub mod cf {
    /// Account records, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Credit transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: `user_id || transaction_id` -> empty.
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Index: external session id -> `transaction_id`.
    pub const TRANSACTIONS_BY_SESSION: &str = "transactions_by_session";

    /// Coupon records, keyed by `coupon_id`.
    pub const COUPONS: &str = "coupons";

    /// Index: upper-cased code -> `coupon_id`.
    pub const COUPON_CODES: &str = "coupon_codes";

    /// Redemptions, keyed by `coupon_id || redemption_id`.
    pub const REDEMPTIONS: &str = "redemptions";

    /// Index: `coupon_id || user_id` -> `redemption_id`.
    pub const REDEMPTIONS_BY_USER: &str = "redemptions_by_user";

    /// Referral records, keyed by `referral_id`.
    pub const REFERRALS: &str = "referrals";

    /// Index: referred `user_id` -> `referral_id`.
    pub const REFERRALS_BY_REFERRED: &str = "referrals_by_referred";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::TRANSACTIONS_BY_SESSION,
        cf::COUPONS,
        cf::COUPON_CODES,
        cf::REDEMPTIONS,
        cf::REDEMPTIONS_BY_USER,
        cf::REFERRALS,
        cf::REFERRALS_BY_REFERRED,
    ]
}
