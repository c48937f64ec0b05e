//! Credit pack catalog and operation costs.
//!
//! The catalog is the only source of truth for what a pack costs and how many
//! credits it grants. It is loaded once at startup and shared (read-only) by
//! the checkout builder and the webhook reconciler, so both sides always agree
//! on prices.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Minimum amount the payment processor will charge, in cents.
pub const DEFAULT_MIN_CHARGE_CENTS: i64 = 50;

/// A purchasable bundle of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPack {
    /// Stable pack identifier (e.g. `10-credits`).
    pub id: String,

    /// Credits granted on purchase.
    pub credits: i64,

    /// List price in cents.
    pub price_cents: i64,
}

impl CreditPack {
    fn new(id: &str, credits: i64, price_cents: i64) -> Self {
        Self {
            id: id.to_string(),
            credits,
            price_cents,
        }
    }
}

/// Versioned, immutable pack catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackCatalog {
    /// Catalog version, stamped into checkout metadata.
    pub version: u32,

    /// ISO currency code (lowercase, as the processor expects).
    pub currency: String,

    /// Processor floor in cents.
    #[serde(default = "default_min_charge")]
    pub min_charge_cents: i64,

    /// Available packs.
    pub packs: Vec<CreditPack>,
}

fn default_min_charge() -> i64 {
    DEFAULT_MIN_CHARGE_CENTS
}

impl Default for PackCatalog {
    fn default() -> Self {
        Self {
            version: 1,
            currency: "usd".to_string(),
            min_charge_cents: DEFAULT_MIN_CHARGE_CENTS,
            packs: vec![
                CreditPack::new("10-credits", 10, 900),
                CreditPack::new("25-credits", 25, 1900),
                CreditPack::new("60-credits", 60, 3900),
            ],
        }
    }
}

impl PackCatalog {
    /// Parse and validate a catalog from JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: Self =
            serde_json::from_str(json).map_err(|e| BillingError::InvalidCatalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load and validate a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` if the file cannot be read or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BillingError::InvalidCatalog(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Check the catalog's structural rules.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.packs.is_empty() {
            return Err(BillingError::InvalidCatalog("catalog has no packs".into()));
        }
        if self.min_charge_cents <= 0 {
            return Err(BillingError::InvalidCatalog(
                "min_charge_cents must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for pack in &self.packs {
            if !seen.insert(pack.id.as_str()) {
                return Err(BillingError::InvalidCatalog(format!(
                    "duplicate pack id: {}",
                    pack.id
                )));
            }
            if pack.credits <= 0 {
                return Err(BillingError::InvalidCatalog(format!(
                    "pack {} must grant credits",
                    pack.id
                )));
            }
            if pack.price_cents < self.min_charge_cents {
                return Err(BillingError::InvalidCatalog(format!(
                    "pack {} is priced below the processor minimum",
                    pack.id
                )));
            }
        }
        Ok(())
    }

    /// Look up a pack by id.
    #[must_use]
    pub fn get(&self, pack_id: &str) -> Option<&CreditPack> {
        self.packs.iter().find(|p| p.id == pack_id)
    }
}

/// A metered operation with a fixed credit cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Rewrite a resume against a job description.
    OptimizeResume,

    /// Search job listings.
    SearchJobs,
}

impl OperationKind {
    /// Credits charged per successful call.
    #[must_use]
    pub const fn cost(&self) -> i64 {
        match self {
            Self::OptimizeResume => 1,
            Self::SearchJobs => 2,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OptimizeResume => "optimize_resume",
            Self::SearchJobs => "search_jobs",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
