//! PostgreSQL adapters - sqlx implementations of the billing ports.
//!
//! - `PostgresBillingStore` - Transactions over subscriptions, the audit log
//!   and the webhook dedup ledger
//! - `PostgresSubscriptionReader` - Non-locking reads
//! - `PostgresFailedWebhookRepository` - Retry ledger
//! - `PostgresRunLedger` - Scheduler "already ran today" guard

mod billing_store;
mod failed_webhook_repository;
mod pool;
mod rows;
mod run_ledger;
mod subscription_reader;

pub use billing_store::{PostgresBillingStore, DEFAULT_LOCK_TIMEOUT};
pub use failed_webhook_repository::PostgresFailedWebhookRepository;
pub use pool::{connect, migrate};
pub use run_ledger::PostgresRunLedger;
pub use subscription_reader::PostgresSubscriptionReader;
