//! Referral types.
//!
//! A referral links a new user to the existing user who invited them. It stays
//! pending until the referred user's first successful metered operation, at
//! which point both sides receive [`REFERRAL_REWARD_CREDITS`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ReferralId, UserId};

/// Credits granted to each side of a completed referral.
pub const REFERRAL_REWARD_CREDITS: i64 = 2;

/// Referral lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    /// Waiting for the referred user's first operation.
    Pending,

    /// Referred user completed an operation.
    Completed,
}

impl ReferralStatus {
    /// Database/wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    /// Parse the database/wire name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Which side of a referral a reward goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralRole {
    /// The inviting user.
    Referrer,

    /// The invited user.
    Referred,
}

impl ReferralRole {
    /// Name used in reward idempotency keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Referrer => "referrer",
            Self::Referred => "referred",
        }
    }
}

/// A referral between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    /// Referral ID.
    pub id: ReferralId,

    /// The inviting user.
    pub referrer_id: UserId,

    /// The invited user.
    pub referred_id: UserId,

    /// Lifecycle state.
    pub status: ReferralStatus,

    /// Whether both rewards have been granted.
    pub reward_granted: bool,

    /// When the referral was recorded.
    pub created_at: DateTime<Utc>,
}

impl Referral {
    /// Create a pending referral.
    #[must_use]
    pub fn new(referrer_id: UserId, referred_id: UserId) -> Self {
        Self {
            id: ReferralId::generate(),
            referrer_id,
            referred_id,
            status: ReferralStatus::Pending,
            reward_granted: false,
            created_at: Utc::now(),
        }
    }

    /// The user receiving the reward for `role`.
    #[must_use]
    pub const fn user_for(&self, role: ReferralRole) -> UserId {
        match role {
            ReferralRole::Referrer => self.referrer_id,
            ReferralRole::Referred => self.referred_id,
        }
    }
}
