//! Coupon validation against a specific user and purchase.

use chrono::{DateTime, Utc};

use cvboost_core::{Coupon, CouponRejection, UserId};
use cvboost_store::{Store, StoreError};

/// Why a coupon could not be validated.
#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    /// The coupon failed a rule.
    #[error(transparent)]
    Rejected(#[from] CouponRejection),

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Check whether `user_id` may apply `code` to a purchase of `purchase_cents`.
///
/// Rules are applied in order and the first failure is returned: the code
/// exists and is active, has not expired, has uses left, the purchase meets
/// its minimum, and the user has not redeemed it before. Nothing is mutated.
pub async fn validate_coupon(
    store: &dyn Store,
    code: &str,
    user_id: &UserId,
    purchase_cents: i64,
    now: DateTime<Utc>,
) -> Result<Coupon, CouponError> {
    let coupon = store
        .find_coupon_by_code(code)
        .await?
        .ok_or(CouponRejection::NotFound)?;

    coupon.check(purchase_cents, now)?;

    if store.has_redemption(&coupon.id, user_id).await? {
        return Err(CouponRejection::AlreadyUsed.into());
    }

    Ok(coupon)
}
