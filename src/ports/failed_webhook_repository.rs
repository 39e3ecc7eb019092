//! FailedWebhookRepository port - retry ledger for webhooks that could not
//! be applied.
//!
//! Written outside the processing transaction (which has already rolled
//! back). Keyed by `external_event_id`: repeated failures of one event update
//! the same row.

use async_trait::async_trait;

use crate::domain::billing::FailedWebhookEvent;
use crate::domain::foundation::{DomainError, FailedWebhookId, Timestamp};

#[async_trait]
pub trait FailedWebhookRepository: Send + Sync {
    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<FailedWebhookEvent>, DomainError>;

    /// Inserts or replaces the row for `record.external_event_id`.
    async fn upsert(&self, record: &FailedWebhookEvent) -> Result<(), DomainError>;

    /// Unresolved rows with `next_retry_at <= now`, oldest first.
    async fn due_for_retry(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<FailedWebhookEvent>, DomainError>;

    async fn mark_resolved(&self, id: FailedWebhookId, now: Timestamp) -> Result<(), DomainError>;
}
