//! Credit ledger workflows built on the store.

pub mod checkout;
pub mod coupons;
pub mod guard;
pub mod metadata;
pub mod reconciler;
pub mod referrals;
pub mod side_effects;

pub use checkout::{open_checkout, price_purchase, redirect_origin, CheckoutError, PricedPurchase};
pub use coupons::{validate_coupon, CouponError};
pub use guard::{GuardError, Metered, MeteredGuard, WorkError};
pub use metadata::PurchaseMetadata;
pub use reconciler::{ReconcileError, ReconcileOutcome, SignatureConfig, WebhookReconciler};
pub use referrals::{register_referral, reward_first_operation, ReferralError};
pub use side_effects::{SideEffect, SideEffectQueue};
