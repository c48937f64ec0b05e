//! Cryptographic helpers for webhook signatures and shared-secret checks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Error building the MAC.
#[derive(Debug, thiserror::Error)]
#[error("invalid HMAC key")]
pub struct InvalidKey;

/// Compute HMAC-SHA256 of `message` under `secret`, hex-encoded (64 chars).
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, InvalidKey> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| InvalidKey)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Compare two strings without short-circuiting on the first differing byte.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
