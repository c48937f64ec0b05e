//! Metadata stamped on a checkout session and read back from its webhook.

use std::collections::HashMap;

use cvboost_core::{CouponId, UserId};

const USER_ID: &str = "user_id";
const CREDITS: &str = "credits";
const PACK_ID: &str = "pack_id";
const COUPON_ID: &str = "coupon_id";
const COUPON_CODE: &str = "coupon_code";
const DISCOUNT_CENTS: &str = "discount_cents";
const CATALOG_VERSION: &str = "catalog_version";

/// Purchase details carried through the payment processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseMetadata {
    /// Buyer.
    pub user_id: UserId,
    /// Credits the buyer should receive.
    pub credits: i64,
    /// Pack purchased.
    pub pack_id: String,
    /// Coupon applied, if any.
    pub coupon_id: Option<CouponId>,
    /// Code of the coupon applied, if any.
    pub coupon_code: Option<String>,
    /// Discount in cents (0 without a coupon).
    pub discount_cents: i64,
    /// Catalog version the price was computed from.
    pub catalog_version: u32,
}

/// Metadata missing or unparseable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid purchase metadata: {0}")]
pub struct MetadataError(String);

impl PurchaseMetadata {
    /// Flatten into the string pairs the processor stores.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (USER_ID.to_string(), self.user_id.to_string()),
            (CREDITS.to_string(), self.credits.to_string()),
            (PACK_ID.to_string(), self.pack_id.clone()),
            (DISCOUNT_CENTS.to_string(), self.discount_cents.to_string()),
            (CATALOG_VERSION.to_string(), self.catalog_version.to_string()),
        ];
        if let Some(coupon_id) = self.coupon_id {
            pairs.push((COUPON_ID.to_string(), coupon_id.to_string()));
        }
        if let Some(code) = &self.coupon_code {
            pairs.push((COUPON_CODE.to_string(), code.clone()));
        }
        pairs
    }

    /// Parse the processor's string map. User id, credits and pack id are
    /// required; the rest default when absent.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, MetadataError> {
        let required = |key: &str| {
            map.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| MetadataError(format!("missing {key}")))
        };
        let optional = |key: &str| map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let user_id: UserId = required(USER_ID)?
            .parse()
            .map_err(|_| MetadataError(format!("bad {USER_ID}")))?;
        let credits: i64 = required(CREDITS)?
            .parse()
            .map_err(|_| MetadataError(format!("bad {CREDITS}")))?;
        let pack_id = required(PACK_ID)?.to_string();
        let coupon_id: Option<CouponId> = optional(COUPON_ID)
            .map(str::parse)
            .transpose()
            .map_err(|_| MetadataError(format!("bad {COUPON_ID}")))?;
        let discount_cents: i64 = optional(DISCOUNT_CENTS)
            .map(str::parse)
            .transpose()
            .map_err(|_| MetadataError(format!("bad {DISCOUNT_CENTS}")))?
            .unwrap_or(0);
        let catalog_version: u32 = optional(CATALOG_VERSION)
            .map(str::parse)
            .transpose()
            .map_err(|_| MetadataError(format!("bad {CATALOG_VERSION}")))?
            .unwrap_or(0);

        Ok(Self {
            user_id,
            credits,
            pack_id,
            coupon_id,
            coupon_code: optional(COUPON_CODE).map(str::to_string),
            discount_cents,
            catalog_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn pairs_parse_back() {
        let metadata = PurchaseMetadata {
            user_id: UserId::generate(),
            credits: 10,
            pack_id: "10-credits".into(),
            coupon_id: Some(CouponId::generate()),
            coupon_code: Some("SAVE20".into()),
            discount_cents: 180,
            catalog_version: 1,
        };
        let parsed = PurchaseMetadata::from_map(&metadata.to_pairs().into_iter().collect()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn coupon_fields_are_optional() {
        let user = UserId::generate().to_string();
        let parsed = PurchaseMetadata::from_map(&map(&[
            ("user_id", user.as_str()),
            ("credits", "25"),
            ("pack_id", "25-credits"),
        ]))
        .unwrap();
        assert_eq!(parsed.coupon_id, None);
        assert_eq!(parsed.discount_cents, 0);
    }

    #[test]
    fn missing_or_garbled_required_fields_fail() {
        let user = UserId::generate().to_string();
        assert!(PurchaseMetadata::from_map(&map(&[("credits", "10"), ("pack_id", "10-credits")])).is_err());
        assert!(PurchaseMetadata::from_map(&map(&[
            ("user_id", user.as_str()),
            ("credits", "ten"),
            ("pack_id", "10-credits"),
        ]))
        .is_err());
        assert!(PurchaseMetadata::from_map(&map(&[
            ("user_id", "not-a-uuid"),
            ("credits", "10"),
            ("pack_id", "10-credits"),
        ]))
        .is_err());
    }
}
