//! In-memory adapters for tests and local development.
//!
//! Same semantics as the Postgres adapters, including all-or-nothing
//! transactions, without a database.

mod billing_store;
mod failed_webhook_repository;
mod run_ledger;
mod usage_reader;

pub use billing_store::InMemoryBillingStore;
pub use failed_webhook_repository::InMemoryFailedWebhookRepository;
pub use run_ledger::InMemoryRunLedger;
pub use usage_reader::InMemoryUsageReader;
