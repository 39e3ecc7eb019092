//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Command handlers write through `BillingStore` transactions; the plan
//! limit query only reads.

pub mod handlers;

pub use handlers::billing::{
    BackfillSubscriptionsCommand, BackfillSubscriptionsHandler, BackfillSubscriptionsResult,
    CheckFeatureQuery, CheckPlanLimitHandler, CheckPlanLimitQuery, IngestWebhookCommand,
    IngestWebhookHandler, IngestWebhookResult, ProviderRegistry, RetryFailedWebhooksCommand,
    RetryFailedWebhooksHandler, RetryFailedWebhooksResult, RunGraceSchedulerCommand,
    RunGraceSchedulerHandler, RunGraceSchedulerResult, WebhookApplier, WebhookOutcome,
};
