//! SubscriptionReader port - non-locking reads.
//!
//! Used by the plan-limit gate and for the scheduler's candidate scan. Nothing
//! read here may be written back without re-reading under a lock.

use async_trait::async_trait;

use crate::domain::billing::{Subscription, SubscriptionEvent, SubscriptionStatus};
use crate::domain::foundation::{DomainError, SubscriptionId, TenantId};

#[async_trait]
pub trait SubscriptionReader: Send + Sync {
    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// The tenant's most recent current subscription (Trialing, Active,
    /// PastDue). Falls back to the most recent row of any status so callers
    /// can report why access ended.
    async fn find_current_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Subscriptions in any of `statuses`.
    async fn list_by_status(
        &self,
        statuses: &[SubscriptionStatus],
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Audit trail of one subscription, oldest first.
    async fn events_for(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<SubscriptionEvent>, DomainError>;
}
