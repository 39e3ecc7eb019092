//! PlanCatalog port - read-only plan reference data.

use async_trait::async_trait;

use crate::domain::billing::Plan;
use crate::domain::foundation::{DomainError, PlanId};

#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, DomainError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Plan>, DomainError>;

    /// Resolves the provider's price object to a plan.
    async fn find_by_provider_price(&self, price_id: &str) -> Result<Option<Plan>, DomainError>;
}
