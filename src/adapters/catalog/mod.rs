//! File-backed reference data: plans and tenants.

mod yaml_plan_catalog;
mod yaml_tenant_directory;

pub use yaml_plan_catalog::YamlPlanCatalog;
pub use yaml_tenant_directory::YamlTenantDirectory;
