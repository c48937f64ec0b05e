//! Referral registration and first-operation rewards.

use cvboost_core::{
    CreditTransaction, Referral, ReferralRole, ReferralStatus, UserId, REFERRAL_REWARD_CREDITS,
};
use cvboost_store::{CreditOutcome, Store, StoreError};

/// Why a referral could not be registered.
#[derive(Debug, thiserror::Error)]
pub enum ReferralError {
    /// A user cannot refer themselves.
    #[error("a user cannot refer themselves")]
    SelfReferral,

    /// The referrer has no account.
    #[error("referrer not found")]
    UnknownReferrer,

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Record that `referrer` brought in `referred`.
///
/// Returns `false` when `referred` already has a referral.
pub async fn register_referral(
    store: &dyn Store,
    referrer: UserId,
    referred: UserId,
) -> Result<bool, ReferralError> {
    if referrer == referred {
        return Err(ReferralError::SelfReferral);
    }
    if store.get_account(&referrer).await?.is_none() {
        return Err(ReferralError::UnknownReferrer);
    }

    let created = store.create_referral(&Referral::new(referrer, referred)).await?;
    if created {
        tracing::info!(referrer = %referrer, referred = %referred, "Referral registered");
    }
    Ok(created)
}

/// Complete `user_id`'s referral and credit both sides.
///
/// Safe to call repeatedly: completion is conditional and each reward is keyed
/// by referral and role, so a retry after a partial failure only finishes what
/// is missing. Returns whether any credits were granted by this call.
pub async fn reward_first_operation(store: &dyn Store, user_id: &UserId) -> Result<bool, StoreError> {
    let Some(referral) = store.get_referral_for(user_id).await? else {
        return Ok(false);
    };
    if referral.reward_granted {
        return Ok(false);
    }

    if referral.status == ReferralStatus::Pending && store.complete_referral(&referral.id).await? {
        tracing::info!(referral_id = %referral.id, user_id = %user_id, "Referral completed");
    }

    let mut granted = false;
    for role in [ReferralRole::Referrer, ReferralRole::Referred] {
        let recipient = referral.user_for(role);
        let reward = CreditTransaction::referral_reward(
            recipient,
            REFERRAL_REWARD_CREDITS,
            referral.id,
            role,
        );
        if let CreditOutcome::Credited { balance } = store.record_credit(&reward).await? {
            granted = true;
            tracing::info!(
                referral_id = %referral.id,
                user_id = %recipient,
                role = %role.as_str(),
                credits = %REFERRAL_REWARD_CREDITS,
                new_balance = %balance,
                "Referral reward granted"
            );
        }
    }

    store.mark_referral_rewarded(&referral.id).await?;
    Ok(granted)
}
