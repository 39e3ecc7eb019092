//! In-memory retry ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::billing::FailedWebhookEvent;
use crate::domain::foundation::{DomainError, ErrorCode, FailedWebhookId, Timestamp};
use crate::ports::FailedWebhookRepository;

#[derive(Debug, Clone, Default)]
pub struct InMemoryFailedWebhookRepository {
    rows: Arc<RwLock<HashMap<String, FailedWebhookEvent>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryFailedWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `upsert` fail with a database error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn all(&self) -> Vec<FailedWebhookEvent> {
        let mut rows: Vec<FailedWebhookEvent> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }
}

#[async_trait]
impl FailedWebhookRepository for InMemoryFailedWebhookRepository {
    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<FailedWebhookEvent>, DomainError> {
        Ok(self.rows.read().await.get(external_event_id).cloned())
    }

    async fn upsert(&self, record: &FailedWebhookEvent) -> Result<(), DomainError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::database("connection refused"));
        }
        self.rows
            .write()
            .await
            .insert(record.external_event_id.clone(), record.clone());
        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<FailedWebhookEvent>, DomainError> {
        let rows = self.rows.read().await;
        let mut due: Vec<FailedWebhookEvent> =
            rows.values().filter(|r| r.is_due(now)).cloned().collect();
        due.sort_by(|a, b| a.next_retry_at.cmp(&b.next_retry_at));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_resolved(&self, id: FailedWebhookId, now: Timestamp) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        let row = rows.values_mut().find(|r| r.id == id).ok_or_else(|| {
            DomainError::new(
                ErrorCode::InternalError,
                format!("Failed webhook {} not found", id),
            )
        })?;
        row.mark_resolved(now);
        Ok(())
    }
}
