//! Price computation for credit pack purchases.
//!
//! All amounts are integer cents. Percentage discounts round half up to the
//! nearest cent, fixed discounts are capped at the list price, and the final
//! price is clamped up to the processor floor. After clamping the recorded
//! discount is always `list - final`.

use serde::{Deserialize, Serialize};

use crate::{Coupon, CreditPack, DiscountType};

/// A discount resolved from a validated coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    /// Discount kind.
    pub discount_type: DiscountType,

    /// Percent or cents.
    pub value: i64,
}

impl From<&Coupon> for Discount {
    fn from(coupon: &Coupon) -> Self {
        Self {
            discount_type: coupon.discount_type,
            value: coupon.discount_value,
        }
    }
}

impl Discount {
    /// Raw discount in cents for `list_cents`, before the floor clamp.
    #[must_use]
    pub fn amount_off(&self, list_cents: i64) -> i64 {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = self.value.clamp(0, 100);
                (list_cents * pct + 50) / 100
            }
            DiscountType::Fixed => self.value.max(0),
        };
        raw.min(list_cents)
    }
}

/// The price a user will be charged for a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Catalog list price.
    pub list_price_cents: i64,

    /// Discount actually applied (`list - final`).
    pub discount_cents: i64,

    /// Amount to charge.
    pub final_price_cents: i64,

    /// Credits granted.
    pub credits: i64,
}

/// Quote the price of `pack` with an optional discount.
#[must_use]
pub fn quote_price(pack: &CreditPack, discount: Option<Discount>, min_charge_cents: i64) -> PriceQuote {
    let list = pack.price_cents;
    let off = discount.map_or(0, |d| d.amount_off(list));
    let final_price = (list - off).max(min_charge_cents);

    PriceQuote {
        list_price_cents: list,
        discount_cents: list - final_price,
        final_price_cents: final_price,
        credits: pack.credits,
    }
}
