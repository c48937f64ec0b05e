//! Key encoding for the `RocksDB` backend.
//!
//! UUIDs and ULIDs are stored as their 16 raw bytes. Composite keys are plain
//! concatenations, so a 16-byte prefix scan finds every entry for one owner.

use cvboost_core::{CouponId, TransactionId, UserId};

use crate::error::{Result, StoreError};

/// Concatenate two 16-byte ids.
#[must_use]
pub fn pair(first: &[u8; 16], second: &[u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(first);
    key.extend_from_slice(second);
    key
}

/// Index key for a user's transaction.
///
/// ULIDs are time-ordered, so a user's entries sort oldest to newest.
#[must_use]
pub fn user_transaction_key(user_id: &UserId, transaction_id: &TransactionId) -> Vec<u8> {
    pair(user_id.as_bytes(), &transaction_id.to_bytes())
}

/// Index key for a (coupon, user) redemption.
#[must_use]
pub fn coupon_user_key(coupon_id: &CouponId, user_id: &UserId) -> Vec<u8> {
    pair(coupon_id.as_bytes(), user_id.as_bytes())
}

/// Extract the transaction id from a user-transaction index key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is not 32 bytes.
pub fn transaction_id_from_user_key(key: &[u8]) -> Result<TransactionId> {
    let bytes: [u8; 16] = key
        .get(16..32)
        .and_then(|tail| tail.try_into().ok())
        .ok_or_else(|| StoreError::Serialization(format!("bad index key length {}", key.len())))?;
    Ok(TransactionId::from_bytes(bytes))
}
