//! Error types for the credit ledger domain.

use crate::ids::IdError;

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors raised by domain-level validation.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The pack catalog is malformed.
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A coupon definition is malformed.
    #[error("invalid coupon definition: {0}")]
    InvalidCouponDefinition(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
