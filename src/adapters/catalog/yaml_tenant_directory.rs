//! YAML tenant directory.
//!
//! Stand-in for the host application's tenant table, used by the backfill
//! tool and for notification recipients.
//!
//! ```yaml
//! tenants:
//!   - tenant_id: 3c1e9a52-7f44-4d8b-b1f0-6a2d9e5c7b10
//!     name: Acme
//!     email: billing@acme.test
//!     plan_slug: team
//!     created_at: 2024-01-15T09:30:00Z
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;

use crate::domain::foundation::{DomainError, ErrorCode, TenantId};
use crate::ports::{TenantDirectory, TenantRecord};

#[derive(Debug, Deserialize)]
struct TenantsFile {
    tenants: Vec<TenantRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct YamlTenantDirectory {
    /// Sorted by tenant id.
    tenants: Vec<TenantRecord>,
}

impl YamlTenantDirectory {
    pub fn from_records(mut tenants: Vec<TenantRecord>) -> Self {
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        tenants.dedup_by(|a, b| a.tenant_id == b.tenant_id);
        Self { tenants }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, DomainError> {
        let file: TenantsFile = serde_yaml::from_str(yaml).map_err(|e| {
            DomainError::new(ErrorCode::InvalidFormat, format!("Invalid tenants file: {}", e))
        })?;
        Ok(Self::from_records(file.tenants))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).await.map_err(|e| {
            DomainError::new(
                ErrorCode::InternalError,
                format!("Cannot read tenants file {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&yaml)
    }
}

#[async_trait]
impl TenantDirectory for YamlTenantDirectory {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<TenantRecord>, DomainError> {
        Ok(self
            .tenants
            .binary_search_by(|t| t.tenant_id.cmp(&tenant_id))
            .ok()
            .map(|idx| self.tenants[idx].clone()))
    }

    async fn list(
        &self,
        after: Option<TenantId>,
        limit: u32,
    ) -> Result<Vec<TenantRecord>, DomainError> {
        Ok(self
            .tenants
            .iter()
            .filter(|t| after.map_or(true, |after| t.tenant_id > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
