//! TenantDirectory port - tenants known to the host application.
//!
//! Read by the backfill tool and by notifiers that need a recipient.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, TenantId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: TenantId,
    pub name: String,
    pub email: String,
    /// Plan the tenant should be placed on.
    pub plan_slug: String,
    pub created_at: Timestamp,
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<TenantRecord>, DomainError>;

    /// Page of tenants ordered by id, strictly after `after`.
    async fn list(
        &self,
        after: Option<TenantId>,
        limit: u32,
    ) -> Result<Vec<TenantRecord>, DomainError>;
}
