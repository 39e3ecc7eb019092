//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the billing domain and the outside world. Adapters implement these ports.
//!
//! ## Write Ports
//!
//! - `BillingStore` / `BillingTransaction` - Subscriptions, audit log and the
//!   webhook dedup ledger under one transaction
//! - `FailedWebhookRepository` - Retry ledger for failed webhooks
//! - `SchedulerRunLedger` - "Already ran today" guard for scheduler passes
//!
//! ## Read Ports
//!
//! - `SubscriptionReader` - Non-locking subscription queries
//! - `PlanCatalog` - Plan reference data
//! - `UsageReader` - Metered resource consumption
//! - `TenantDirectory` - Tenants known to the host application
//!
//! ## External Services
//!
//! - `BillingProvider` - Payment provider gateway
//! - `GraceNotifier` - Grace-period reminders

mod billing_provider;
mod billing_store;
mod failed_webhook_repository;
mod grace_notifier;
mod plan_catalog;
mod run_ledger;
mod subscription_reader;
mod tenant_directory;
mod usage_reader;

pub use billing_provider::{
    BillingProvider, CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest,
    CreateSubscriptionRequest, Customer, PlanChange, PortalSession, ProviderError,
    ProviderErrorCode, ProviderSubscription,
};
pub use billing_store::{BillingStore, BillingTransaction, ClaimResult, ProcessedWebhookEvent};
pub use failed_webhook_repository::FailedWebhookRepository;
pub use grace_notifier::{Delivery, GraceNotice, GraceNotifier, NotifyError};
pub use plan_catalog::PlanCatalog;
pub use run_ledger::{SchedulerPass, SchedulerRunLedger};
pub use subscription_reader::SubscriptionReader;
pub use tenant_directory::{TenantDirectory, TenantRecord};
pub use usage_reader::UsageReader;
