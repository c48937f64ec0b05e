//! Strongly-typed identifiers.
//!
//! Users, coupons, redemptions and referrals are UUIDs (user ids come from the
//! identity provider's `sub` claim). Ledger transactions are ULIDs so that
//! byte order is creation order. Every id travels as its canonical string on
//! the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// An id string that did not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Expected a UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// Expected a ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

/// String conversions shared by every id: parse, print, and serde through
/// `String`.
macro_rules! string_id {
    ($name:ident, $parse:expr) => {
        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $parse(s.trim()).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// A fresh random (v4) id.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wrap a UUID read from storage.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// The wrapped UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// The 16 raw bytes, used as storage keys.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        string_id!($name, |s: &str| uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid));
    };
}

uuid_id!(
    /// A user, as identified by the identity provider.
    UserId
);
uuid_id!(
    /// A coupon.
    CouponId
);
uuid_id!(
    /// One use of a coupon.
    RedemptionId
);
uuid_id!(
    /// A referrer/referred pairing.
    ReferralId
);

/// A ledger entry.
///
/// Ordering follows creation time, so a user's history can be read newest
/// first straight off a key-ordered index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(Ulid);

impl TransactionId {
    /// A fresh id stamped with the current time.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// The 16 raw bytes, used as storage keys.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    /// Rebuild from storage key bytes. Any 16 bytes are a valid ULID.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Ulid::from_bytes(bytes))
    }
}

string_id!(TransactionId, |s: &str| Ulid::from_string(s).map_err(|_| IdError::InvalidUlid));
