//! `Stripe-Signature` verification.
//!
//! The header has the form `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`, where each
//! `v1` value is HMAC-SHA256 of `"<t>.<raw body>"` under the endpoint secret.
//! Several `v1` entries appear while a secret is being rolled.

use crate::crypto::{constant_time_eq, hmac_sha256_hex, InvalidKey};

/// Why a signature was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No `t=` element.
    #[error("signature header has no timestamp")]
    MissingTimestamp,

    /// No `v1=` element.
    #[error("signature header has no v1 signature")]
    MissingSignature,

    /// Timestamp outside the tolerance window.
    #[error("signature timestamp outside tolerance")]
    Expired,

    /// No `v1` value matched.
    #[error("signature mismatch")]
    Mismatch,

    /// The secret could not key the MAC.
    #[error("invalid webhook secret")]
    InvalidSecret,
}

impl From<InvalidKey> for SignatureError {
    fn from(_: InvalidKey) -> Self {
        Self::InvalidSecret
    }
}

/// Verify `header` against the raw `payload`.
///
/// `now` is unix seconds; a timestamp further than `tolerance_seconds` from it
/// in either direction is refused.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MissingTimestamp)?;
    if now.abs_diff(signed_at) > tolerance_seconds.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))?;
    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header for `payload`, as Stripe would.
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))?;
    Ok(format!("t={timestamp},v1={signature}"))
}
