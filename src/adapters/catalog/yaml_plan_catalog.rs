//! YAML plan catalog.
//!
//! Plans are reference data loaded once at startup:
//!
//! ```yaml
//! plans:
//!   - id: 7d2f6c1e-0b7a-4c55-9a1e-2f3b4c5d6e7f
//!     slug: team
//!     price_cents: 4900
//!     billing_interval: month
//!     trial_days: 14
//!     provider_price_id: price_team_monthly
//!     limits: { users: 10, projects: 25 }
//!     features: [api_access]
//! ```

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;

use crate::domain::billing::Plan;
use crate::domain::foundation::{DomainError, ErrorCode, PlanId};
use crate::ports::PlanCatalog;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    plans: Vec<Plan>,
}

/// Immutable, in-memory plan catalog.
#[derive(Debug, Clone)]
pub struct YamlPlanCatalog {
    plans: Vec<Plan>,
}

impl YamlPlanCatalog {
    /// Builds a catalog from already-parsed plans.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` for an invalid plan or a duplicated id,
    /// slug or provider price.
    pub fn from_plans(plans: Vec<Plan>) -> Result<Self, DomainError> {
        let mut ids = HashSet::new();
        let mut slugs = HashSet::new();
        let mut prices = HashSet::new();
        for plan in &plans {
            plan.validate()?;
            if !ids.insert(plan.id) {
                return Err(DomainError::validation("id", format!("Duplicate plan id {}", plan.id)));
            }
            if !slugs.insert(plan.slug.as_str()) {
                return Err(DomainError::validation(
                    "slug",
                    format!("Duplicate plan slug '{}'", plan.slug),
                ));
            }
            if let Some(price) = &plan.provider_price_id {
                if !prices.insert(price.as_str()) {
                    return Err(DomainError::validation(
                        "provider_price_id",
                        format!("Price '{}' mapped to more than one plan", price),
                    ));
                }
            }
        }
        Ok(Self { plans })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, DomainError> {
        let file: CatalogFile = serde_yaml::from_str(yaml).map_err(|e| {
            DomainError::new(ErrorCode::InvalidFormat, format!("Invalid plan catalog: {}", e))
        })?;
        Self::from_plans(file.plans)
    }

    /// Reads and parses a catalog file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).await.map_err(|e| {
            DomainError::new(
                ErrorCode::InternalError,
                format!("Cannot read plan catalog {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

#[async_trait]
impl PlanCatalog for YamlPlanCatalog {
    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, DomainError> {
        Ok(self.plans.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Plan>, DomainError> {
        Ok(self.plans.iter().find(|p| p.slug == slug).cloned())
    }

    async fn find_by_provider_price(&self, price_id: &str) -> Result<Option<Plan>, DomainError> {
        Ok(self
            .plans
            .iter()
            .find(|p| p.provider_price_id.as_deref() == Some(price_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{test_plan, BillingInterval};
    use std::io::Write;

    const CATALOG: &str = r#"
plans:
  - id: 7d2f6c1e-0b7a-4c55-9a1e-2f3b4c5d6e7f
    slug: team
    price_cents: 4900
    billing_interval: month
    trial_days: 14
    provider_price_id: price_team_monthly
    limits:
      users: 10
      projects: 0
    features: [api_access, sso]
  - id: 0a9b8c7d-6e5f-4a3b-2c1d-0e9f8a7b6c5d
    slug: enterprise
    price_cents: 49000
    currency: eur
    billing_interval: year
"#;

    #[tokio::test]
    async fn parses_plans_with_defaults() {
        let catalog = YamlPlanCatalog::from_yaml(CATALOG).unwrap();
        assert_eq!(catalog.plans().len(), 2);

        let team = catalog.find_by_slug("team").await.unwrap().unwrap();
        assert_eq!(team.limit_for("users"), Some(10));
        assert_eq!(team.limit_for("projects"), None);
        assert!(team.includes_feature("sso"));

        let enterprise = catalog.find_by_slug("enterprise").await.unwrap().unwrap();
        assert_eq!(enterprise.currency, "eur");
        assert_eq!(enterprise.billing_interval, BillingInterval::Year);
        assert_eq!(enterprise.trial_days, 0);
        assert!(enterprise.provider_price_id.is_none());
    }

    #[tokio::test]
    async fn resolves_provider_price() {
        let catalog = YamlPlanCatalog::from_yaml(CATALOG).unwrap();
        let plan = catalog
            .find_by_provider_price("price_team_monthly")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plan.slug, "team");
        assert!(catalog
            .find_by_provider_price("price_unknown")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = YamlPlanCatalog::load(file.path()).await.unwrap();
        assert_eq!(catalog.plans().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = YamlPlanCatalog::load("/nonexistent/plans.yaml")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn malformed_yaml_is_invalid_format() {
        let err = YamlPlanCatalog::from_yaml("plans: [{slug: 1").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
    }

    #[test]
    fn duplicate_slug_is_rejected() {
        let a = test_plan("team", &[]);
        let mut b = test_plan("team", &[]);
        b.provider_price_id = Some("price_other".to_string());
        let err = YamlPlanCatalog::from_plans(vec![a, b]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[test]
    fn shared_provider_price_is_rejected() {
        let a = test_plan("team", &[]);
        let mut b = test_plan("business", &[]);
        b.provider_price_id = a.provider_price_id.clone();
        assert!(YamlPlanCatalog::from_plans(vec![a, b]).is_err());
    }
}
