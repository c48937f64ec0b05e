//! Coupon types and validation rules.
//!
//! A coupon discounts a single pack purchase. Rules are evaluated in a fixed
//! order and the first failing rule decides the rejection reason:
//!
//! 1. the code exists and is active
//! 2. the coupon has not expired
//! 3. the use counter is below `max_uses`
//! 4. the purchase meets `min_purchase_cents`
//! 5. the user has not redeemed this coupon before
//!
//! Rules 2-4 depend only on the coupon and live in [`Coupon::check`]. Rules 1
//! and 5 need a store lookup and are applied by the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::{CouponId, RedemptionId, TransactionId, UserId};

/// Normalize a user-supplied coupon code for lookup and storage.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// How a coupon reduces the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Percent off the list price (1-100).
    Percentage,

    /// Fixed amount off in cents.
    Fixed,
}

impl DiscountType {
    /// Database/wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }

    /// Parse the database/wire name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// A discount coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Coupon ID.
    pub id: CouponId,

    /// Upper-cased code.
    pub code: String,

    /// Discount kind.
    pub discount_type: DiscountType,

    /// Percent (for `Percentage`) or cents (for `Fixed`).
    pub discount_value: i64,

    /// Total redemptions allowed across all users.
    pub max_uses: Option<i64>,

    /// Minimum list price, in cents, the coupon applies to.
    pub min_purchase_cents: Option<i64>,

    /// Expiry instant (UTC).
    pub expires_at: Option<DateTime<Utc>>,

    /// Inactive coupons behave as if they did not exist.
    pub active: bool,

    /// Confirmed redemptions so far.
    pub current_uses: i64,

    /// When the coupon was created.
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    /// Apply the coupon-local rules (expiry, usage cap, minimum purchase).
    ///
    /// # Errors
    ///
    /// Returns the first rule the coupon fails for a purchase of
    /// `purchase_cents` at `now`.
    pub fn check(
        &self,
        purchase_cents: i64,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), CouponRejection> {
        if !self.active {
            return Err(CouponRejection::NotFound);
        }
        if self.expires_at.is_some_and(|expires| expires <= now) {
            return Err(CouponRejection::Expired);
        }
        if self.max_uses.is_some_and(|max| self.current_uses >= max) {
            return Err(CouponRejection::Exhausted);
        }
        if let Some(minimum) = self.min_purchase_cents {
            if purchase_cents < minimum {
                return Err(CouponRejection::BelowMinimum { minimum });
            }
        }
        Ok(())
    }

    /// Check if another redemption fits under `max_uses`.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.max_uses.map_or(true, |max| self.current_uses < max)
    }
}

/// Admin input for creating a coupon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCoupon {
    /// Code as typed; normalized on build.
    pub code: String,

    /// Discount kind.
    pub discount_type: DiscountType,

    /// Percent or cents, depending on `discount_type`.
    pub discount_value: i64,

    /// Optional global usage cap.
    #[serde(default)]
    pub max_uses: Option<i64>,

    /// Optional minimum purchase in cents.
    #[serde(default)]
    pub min_purchase_cents: Option<i64>,

    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewCoupon {
    /// Validate the definition and build an active coupon with zero uses.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCouponDefinition` if the code is empty or a value is
    /// out of range.
    pub fn build(self) -> Result<Coupon> {
        let code = normalize_code(&self.code);
        if code.is_empty() || code.len() > 64 {
            return Err(BillingError::InvalidCouponDefinition(
                "code must be 1-64 characters".into(),
            ));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BillingError::InvalidCouponDefinition(
                "code may only contain letters, digits, '-' and '_'".into(),
            ));
        }
        match self.discount_type {
            DiscountType::Percentage if !(1..=100).contains(&self.discount_value) => {
                return Err(BillingError::InvalidCouponDefinition(
                    "percentage must be between 1 and 100".into(),
                ));
            }
            DiscountType::Fixed if self.discount_value <= 0 => {
                return Err(BillingError::InvalidCouponDefinition(
                    "fixed discount must be positive".into(),
                ));
            }
            _ => {}
        }
        if self.max_uses.is_some_and(|max| max <= 0) {
            return Err(BillingError::InvalidCouponDefinition(
                "max_uses must be positive".into(),
            ));
        }
        if self.min_purchase_cents.is_some_and(|min| min < 0) {
            return Err(BillingError::InvalidCouponDefinition(
                "min_purchase_cents cannot be negative".into(),
            ));
        }

        Ok(Coupon {
            id: CouponId::generate(),
            code,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            max_uses: self.max_uses,
            min_purchase_cents: self.min_purchase_cents,
            expires_at: self.expires_at,
            active: true,
            current_uses: 0,
            created_at: Utc::now(),
        })
    }
}

/// Why a coupon cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponRejection {
    /// Unknown or inactive code.
    #[error("coupon code is not valid")]
    NotFound,

    /// Past its expiry.
    #[error("coupon has expired")]
    Expired,

    /// Usage cap reached.
    #[error("coupon has reached its usage limit")]
    Exhausted,

    /// Purchase too small.
    #[error("coupon requires a minimum purchase of {minimum} cents")]
    BelowMinimum {
        /// Required minimum in cents.
        minimum: i64,
    },

    /// The user already redeemed this coupon.
    #[error("coupon has already been used")]
    AlreadyUsed,
}

impl CouponRejection {
    /// Stable machine-readable reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
            Self::BelowMinimum { .. } => "below_minimum",
            Self::AlreadyUsed => "already_used",
        }
    }
}

/// Durable record of a coupon applied to a paid purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRedemption {
    /// Redemption ID.
    pub id: RedemptionId,

    /// Coupon redeemed.
    pub coupon_id: CouponId,

    /// Code at the time of redemption.
    pub coupon_code: String,

    /// Who redeemed it.
    pub user_id: UserId,

    /// The purchase transaction it paid for.
    pub transaction_id: TransactionId,

    /// Discount applied, in cents.
    pub discount_cents: i64,

    /// When it was settled.
    pub created_at: DateTime<Utc>,
}

impl CouponRedemption {
    /// Create a redemption for a credited purchase.
    #[must_use]
    pub fn new(
        coupon_id: CouponId,
        coupon_code: String,
        user_id: UserId,
        transaction_id: TransactionId,
        discount_cents: i64,
    ) -> Self {
        Self {
            id: RedemptionId::generate(),
            coupon_id,
            coupon_code,
            user_id,
            transaction_id,
            discount_cents,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(discount_type: DiscountType, value: i64) -> Coupon {
        NewCoupon {
            code: " save20 ".into(),
            discount_type,
            discount_value: value,
            max_uses: None,
            min_purchase_cents: None,
            expires_at: None,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn build_normalizes_code() {
        let c = coupon(DiscountType::Percentage, 20);
        assert_eq!(c.code, "SAVE20");
        assert!(c.active);
        assert_eq!(c.current_uses, 0);
    }

    #[test]
    fn build_rejects_bad_definitions() {
        let base = NewCoupon {
            code: "X".into(),
            discount_type: DiscountType::Percentage,
            discount_value: 120,
            max_uses: None,
            min_purchase_cents: None,
            expires_at: None,
        };
        assert!(base.clone().build().is_err());

        let zero_fixed = NewCoupon {
            discount_type: DiscountType::Fixed,
            discount_value: 0,
            ..base.clone()
        };
        assert!(zero_fixed.build().is_err());

        let blank = NewCoupon {
            code: "   ".into(),
            discount_value: 10,
            ..base.clone()
        };
        assert!(blank.build().is_err());

        let spaces = NewCoupon {
            code: "two words".into(),
            discount_value: 10,
            ..base
        };
        assert!(spaces.build().is_err());
    }

    #[test]
    fn check_orders_rules() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, 100);
        c.expires_at = Some(now - Duration::hours(1));
        c.max_uses = Some(1);
        c.current_uses = 1;
        c.min_purchase_cents = Some(5000);

        // Expiry is checked before exhaustion and minimum.
        assert_eq!(c.check(900, now), Err(CouponRejection::Expired));

        c.expires_at = Some(now + Duration::hours(1));
        assert_eq!(c.check(900, now), Err(CouponRejection::Exhausted));

        c.current_uses = 0;
        assert_eq!(
            c.check(900, now),
            Err(CouponRejection::BelowMinimum { minimum: 5000 })
        );
        assert_eq!(c.check(5000, now), Ok(()));
    }

    #[test]
    fn inactive_coupon_looks_unknown() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.active = false;
        assert_eq!(c.check(900, Utc::now()), Err(CouponRejection::NotFound));
    }

    #[test]
    fn capacity_tracks_uses() {
        let mut c = coupon(DiscountType::Percentage, 10);
        assert!(c.has_capacity());
        c.max_uses = Some(2);
        c.current_uses = 1;
        assert!(c.has_capacity());
        c.current_uses = 2;
        assert!(!c.has_capacity());
    }

    #[test]
    fn rejection_codes_are_stable() {
        assert_eq!(CouponRejection::AlreadyUsed.code(), "already_used");
        assert_eq!(
            CouponRejection::BelowMinimum { minimum: 1 }.code(),
            "below_minimum"
        );
    }
}
