//! Account registration handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use cvboost_core::{Account, UserId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::register_referral;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// User ID.
    pub user_id: String,
    /// Current balance in credits.
    pub balance: i64,
    /// Whether a payment processor customer is linked.
    pub has_payment_profile: bool,
    /// When the first metered operation succeeded, if ever.
    pub first_operation_at: Option<String>,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            balance: account.balance,
            has_payment_profile: account.customer_id.is_some(),
            first_operation_at: account.first_operation_at.map(|at| at.to_rfc3339()),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create account request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    /// Optional email, passed to the payment processor.
    pub email: Option<String>,
    /// User id of whoever referred this user.
    pub referred_by: Option<String>,
}

/// Create account response.
#[derive(Debug, Serialize)]
pub struct CreateAccountResponse {
    /// The new account.
    #[serde(flatten)]
    pub account: AccountResponse,
    /// Whether a referral was recorded.
    pub referral_registered: bool,
}

/// Register the caller, granting the signup credits.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<CreateAccountResponse>, ApiError> {
    let referrer = body
        .referred_by
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| {
            r.parse::<UserId>()
                .map_err(|_| ApiError::BadRequest("referred_by must be a user id".into()))
        })
        .transpose()?;

    let mut account = Account::new(auth.user_id, state.config.signup_grant_credits);

    if !state.store.create_account(&account).await? {
        return Err(ApiError::Conflict("Account already exists".into()));
    }

    tracing::info!(
        user_id = %auth.user_id,
        grant = account.balance,
        "Account created"
    );

    // Only the request that created the account reaches the processor.
    if let Some(payments) = &state.payments {
        match payments
            .create_customer(&auth.user_id, body.email.as_deref())
            .await
        {
            Ok(customer_id) => match state.store.set_customer_id(&auth.user_id, &customer_id).await {
                Ok(()) => {
                    tracing::info!(
                        user_id = %auth.user_id,
                        customer_id = %customer_id,
                        "Stripe customer created"
                    );
                    account.customer_id = Some(customer_id);
                }
                Err(e) => tracing::warn!(
                    user_id = %auth.user_id,
                    customer_id = %customer_id,
                    error = %e,
                    "Failed to attach Stripe customer"
                ),
            },
            Err(e) => {
                tracing::warn!(
                    user_id = %auth.user_id,
                    error = %e,
                    "Failed to create Stripe customer - continuing without"
                );
            }
        }
    }

    // A bad referral never blocks signup.
    let referral_registered = match referrer {
        Some(referrer) => match register_referral(state.store.as_ref(), referrer, auth.user_id).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(
                    user_id = %auth.user_id,
                    referrer = %referrer,
                    error = %e,
                    "Referral not recorded"
                );
                false
            }
        },
        None => false,
    };

    Ok(Json(CreateAccountResponse {
        account: AccountResponse::from(&account),
        referral_registered,
    }))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .store
        .get_account(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(AccountResponse::from(&account)))
}
