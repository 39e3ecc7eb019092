//! Billing handlers.
//!
//! ## Commands
//! - Ingesting provider webhooks
//! - Replaying failed webhooks from the retry ledger
//! - Running the grace-period scheduler
//! - Backfilling subscriptions for existing tenants
//!
//! ## Queries
//! - Plan limit and feature checks

mod backfill_subscriptions;
mod check_plan_limit;
mod ingest_webhook;
mod provider_registry;
mod retry_failed_webhooks;
mod run_grace_scheduler;
mod webhook_applier;

#[cfg(test)]
pub(crate) mod fixtures;

pub use provider_registry::ProviderRegistry;
pub use webhook_applier::{WebhookApplier, WebhookOutcome};

// Commands
pub use backfill_subscriptions::{
    BackfillSubscriptionsCommand, BackfillSubscriptionsHandler, BackfillSubscriptionsResult,
    DEFAULT_BACKFILL_BATCH_SIZE,
};
pub use ingest_webhook::{
    IngestWebhookCommand, IngestWebhookHandler, IngestWebhookResult, DEFAULT_WEBHOOK_TIMEOUT,
};
pub use retry_failed_webhooks::{
    RetryFailedWebhooksCommand, RetryFailedWebhooksHandler, RetryFailedWebhooksResult,
    DEFAULT_RETRY_BATCH_SIZE,
};
pub use run_grace_scheduler::{
    RunGraceSchedulerCommand, RunGraceSchedulerHandler, RunGraceSchedulerResult,
};

// Queries
pub use check_plan_limit::{CheckFeatureQuery, CheckPlanLimitHandler, CheckPlanLimitQuery};
