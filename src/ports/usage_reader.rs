//! UsageReader port - current consumption of metered resources.
//!
//! Owned by the host application. The limit gate reads it without locking,
//! so concurrent callers may briefly overshoot a cap.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, TenantId};

#[async_trait]
pub trait UsageReader: Send + Sync {
    /// Units of `resource` the tenant currently uses.
    async fn current_usage(&self, tenant_id: TenantId, resource: &str) -> Result<u64, DomainError>;
}
