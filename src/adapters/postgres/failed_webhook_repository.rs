//! PostgreSQL implementation of FailedWebhookRepository.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::billing::FailedWebhookEvent;
use crate::domain::foundation::{DomainError, FailedWebhookId, Timestamp};
use crate::ports::FailedWebhookRepository;

use super::rows::{db_error, dt, FailedWebhookRow};

const COLUMNS: &str = "id, provider, external_event_id, payload, error, attempts, \
     next_retry_at, created_at, updated_at, resolved_at";

pub struct PostgresFailedWebhookRepository {
    pool: PgPool,
}

impl PostgresFailedWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailedWebhookRepository for PostgresFailedWebhookRepository {
    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<FailedWebhookEvent>, DomainError> {
        let row: Option<FailedWebhookRow> = sqlx::query_as(&format!(
            "SELECT {} FROM failed_webhook_events WHERE external_event_id = $1",
            COLUMNS
        ))
        .bind(external_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load failed webhook", e))?;

        Ok(row.map(FailedWebhookEvent::from))
    }

    async fn upsert(&self, record: &FailedWebhookEvent) -> Result<(), DomainError> {
        let attempts = i32::try_from(record.attempts).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            INSERT INTO failed_webhook_events (
                id, provider, external_event_id, payload, error, attempts,
                next_retry_at, created_at, updated_at, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (external_event_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                payload = EXCLUDED.payload,
                error = EXCLUDED.error,
                attempts = EXCLUDED.attempts,
                next_retry_at = EXCLUDED.next_retry_at,
                updated_at = EXCLUDED.updated_at,
                resolved_at = EXCLUDED.resolved_at
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.provider)
        .bind(&record.external_event_id)
        .bind(&record.payload)
        .bind(&record.error)
        .bind(attempts)
        .bind(dt(record.next_retry_at))
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .bind(dt(record.resolved_at))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record failed webhook", e))?;

        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<FailedWebhookEvent>, DomainError> {
        let rows: Vec<FailedWebhookRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM failed_webhook_events
            WHERE resolved_at IS NULL AND next_retry_at IS NOT NULL AND next_retry_at <= $1
            ORDER BY next_retry_at, id
            LIMIT $2
            "#,
            COLUMNS
        ))
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load due webhooks", e))?;

        Ok(rows.into_iter().map(FailedWebhookEvent::from).collect())
    }

    async fn mark_resolved(&self, id: FailedWebhookId, now: Timestamp) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE failed_webhook_events
            SET resolved_at = $2, next_retry_at = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to resolve failed webhook", e))?;

        Ok(())
    }
}
