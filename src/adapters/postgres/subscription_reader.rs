//! PostgreSQL implementation of SubscriptionReader.
//!
//! Plain reads without row locks, for the limit gate and the scheduler's
//! candidate scan.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::billing::{Subscription, SubscriptionEvent, SubscriptionStatus};
use crate::domain::foundation::{DomainError, SubscriptionId, TenantId};
use crate::ports::SubscriptionReader;

use super::rows::{db_error, into_subscriptions, EventRow, SubscriptionRow, SUBSCRIPTION_COLUMNS};

pub struct PostgresSubscriptionReader {
    pool: PgPool,
}

impl PostgresSubscriptionReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionReader for PostgresSubscriptionReader {
    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_current_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE tenant_id = $1
            ORDER BY (status IN ('trialing', 'active', 'past_due')) DESC, created_at DESC, id DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load tenant subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn list_by_status(
        &self,
        statuses: &[SubscriptionStatus],
    ) -> Result<Vec<Subscription>, DomainError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE status = ANY($1) ORDER BY created_at, id",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list subscriptions by status", e))?;

        into_subscriptions(rows)
    }

    async fn events_for(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<SubscriptionEvent>, DomainError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, subscription_id, event_type, description, properties, created_at
            FROM subscription_events
            WHERE subscription_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(subscription_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load subscription events", e))?;

        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }
}
