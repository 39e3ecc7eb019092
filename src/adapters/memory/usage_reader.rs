//! In-memory usage counters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, TenantId};
use crate::ports::UsageReader;

/// Usage keyed by `(tenant, resource)`. Unknown keys read as zero.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUsageReader {
    usage: Arc<RwLock<HashMap<(TenantId, String), u64>>>,
}

impl InMemoryUsageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_usage(&self, tenant_id: TenantId, resource: &str, units: u64) {
        self.usage
            .write()
            .await
            .insert((tenant_id, resource.to_string()), units);
    }
}

#[async_trait]
impl UsageReader for InMemoryUsageReader {
    async fn current_usage(&self, tenant_id: TenantId, resource: &str) -> Result<u64, DomainError> {
        Ok(self
            .usage
            .read()
            .await
            .get(&(tenant_id, resource.to_string()))
            .copied()
            .unwrap_or(0))
    }
}
