//! Core types and utilities for the cvboost credit ledger.
//!
//! This crate provides the foundational types used throughout the platform:
//!
//! - **Identifiers**: `UserId`, `TransactionId`, `CouponId`, `RedemptionId`, `ReferralId`
//! - **Accounts**: `Account`
//! - **Credits**: `CreditTransaction`, `TransactionType`
//! - **Catalog**: `CreditPack`, `PackCatalog`, `OperationKind`
//! - **Coupons**: `Coupon`, `CouponRedemption`, `CouponRejection`
//! - **Pricing**: `PriceQuote`, `quote_price`
//! - **Referrals**: `Referral`, `ReferralStatus`
//!
//! # Credits and money
//!
//! Credits are whole units. One metered operation costs a fixed number of
//! credits (`OperationKind::cost`). Money is always carried in minor currency
//! units (cents) as `i64`; credits and cents never mix.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod catalog;
pub mod coupon;
pub mod credits;
pub mod error;
pub mod ids;
pub mod pricing;
pub mod referral;

pub use account::{Account, DEFAULT_SIGNUP_GRANT_CREDITS};
pub use catalog::{CreditPack, OperationKind, PackCatalog, DEFAULT_MIN_CHARGE_CENTS};
pub use coupon::{
    normalize_code, Coupon, CouponRedemption, CouponRejection, DiscountType, NewCoupon,
};
pub use credits::{CreditTransaction, TransactionType};
pub use error::{BillingError, Result};
pub use ids::{CouponId, IdError, RedemptionId, ReferralId, TransactionId, UserId};
pub use pricing::{quote_price, Discount, PriceQuote};
pub use referral::{Referral, ReferralRole, ReferralStatus, REFERRAL_REWARD_CREDITS};
