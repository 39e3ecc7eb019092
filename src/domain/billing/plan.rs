//! Plan reference data.
//!
//! Plans are immutable catalog entries. A limit of zero, or no entry at all,
//! means the resource is unlimited on that plan.

use crate::domain::foundation::{PlanId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How often a plan bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

/// A purchasable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,

    /// Stable human-facing key, e.g. `team`.
    pub slug: String,

    /// Price in minor currency units.
    pub price_cents: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    pub billing_interval: BillingInterval,

    #[serde(default)]
    pub trial_days: u32,

    /// Provider price object this plan maps to, if sold through the provider.
    #[serde(default)]
    pub provider_price_id: Option<String>,

    /// Per-resource caps. 0 or absent = unlimited.
    #[serde(default)]
    pub limits: BTreeMap<String, u64>,

    #[serde(default)]
    pub features: BTreeSet<String>,
}

fn default_currency() -> String {
    "usd".to_string()
}

impl Plan {
    /// Returns the cap for `resource`, or `None` when unlimited.
    pub fn limit_for(&self, resource: &str) -> Option<u64> {
        self.limits.get(resource).copied().filter(|max| *max > 0)
    }

    pub fn includes_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn has_trial(&self) -> bool {
        self.trial_days > 0
    }

    /// Checks catalog entry invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.slug.trim().is_empty() {
            return Err(ValidationError::empty_field("slug"));
        }
        if self.price_cents < 0 {
            return Err(ValidationError::out_of_range(
                "price_cents",
                0,
                i64::MAX,
                self.price_cents,
            ));
        }
        if self.currency.len() != 3 {
            return Err(ValidationError::invalid_format(
                "currency",
                "expected a three-letter ISO code",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_plan(slug: &str, limits: &[(&str, u64)]) -> Plan {
    Plan {
        id: PlanId::new(),
        slug: slug.to_string(),
        price_cents: 4900,
        currency: "usd".to_string(),
        billing_interval: BillingInterval::Month,
        trial_days: 14,
        provider_price_id: Some(format!("price_{}", slug)),
        limits: limits.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        features: BTreeSet::new(),
    }
}
