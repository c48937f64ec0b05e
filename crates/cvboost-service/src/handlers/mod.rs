//! API handlers.

pub mod accounts;
pub mod checkout;
pub mod coupons;
pub mod credits;
pub mod health;
pub mod operations;
pub mod webhooks;
