//! PostgreSQL implementation of BillingStore.
//!
//! Each transaction sets `lock_timeout` locally, so a webhook waiting on a
//! row held by the scheduler gives up with SQLSTATE 55P03 instead of
//! blocking its caller.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::billing::{Subscription, SubscriptionEvent};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, TenantId};
use crate::ports::{BillingStore, BillingTransaction, ClaimResult, ProcessedWebhookEvent};

use super::rows::{db_error, dt, into_subscriptions, SubscriptionRow, SUBSCRIPTION_COLUMNS};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PostgresBillingStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        // SET LOCAL does not take bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to set lock timeout", e))?;

        Ok(Box::new(PostgresTransaction { tx }))
    }
}

/// Uncommitted work is rolled back when sqlx drops the inner transaction.
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BillingTransaction for PostgresTransaction {
    async fn claim_event(
        &mut self,
        event: &ProcessedWebhookEvent,
    ) -> Result<ClaimResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhook_events (external_event_id, provider, event_type, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_event_id) DO NOTHING
            "#,
        )
        .bind(&event.external_event_id)
        .bind(&event.provider)
        .bind(&event.event_type)
        .bind(event.processed_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to claim webhook event", e))?;

        Ok(if result.rows_affected() == 1 {
            ClaimResult::Claimed
        } else {
            ClaimResult::AlreadyProcessed
        })
    }

    async fn lock_subscription(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn lock_subscription_by_external_id(
        &mut self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE external_subscription_id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(external_subscription_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn subscriptions_for_tenant(
        &mut self,
        tenant_id: TenantId,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE tenant_id = $1 \
             ORDER BY created_at DESC, id DESC FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(tenant_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock tenant subscriptions", e))?;

        into_subscriptions(rows)
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, plan_id, external_subscription_id, status, trial_ends_at,
                current_period_start, current_period_end, ends_at, cancel_at_period_end,
                metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.tenant_id.as_uuid())
        .bind(subscription.plan_id.as_uuid())
        .bind(&subscription.external_subscription_id)
        .bind(subscription.status.as_str())
        .bind(dt(subscription.trial_ends_at))
        .bind(dt(subscription.current_period_start))
        .bind(dt(subscription.current_period_end))
        .bind(dt(subscription.ends_at))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.metadata.to_value())
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert subscription", e))?;

        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan_id = $2,
                external_subscription_id = $3,
                status = $4,
                trial_ends_at = $5,
                current_period_start = $6,
                current_period_end = $7,
                ends_at = $8,
                cancel_at_period_end = $9,
                metadata = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.plan_id.as_uuid())
        .bind(&subscription.external_subscription_id)
        .bind(subscription.status.as_str())
        .bind(dt(subscription.trial_ends_at))
        .bind(dt(subscription.current_period_start))
        .bind(dt(subscription.current_period_end))
        .bind(dt(subscription.ends_at))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.metadata.to_value())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to update subscription", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", subscription.id),
            ));
        }
        Ok(())
    }

    async fn append_event(&mut self, event: &SubscriptionEvent) -> Result<(), DomainError> {
        let properties = serde_json::to_value(&event.properties).map_err(|e| {
            DomainError::database(format!("Failed to encode event properties: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO subscription_events (id, subscription_id, event_type, description, properties, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.subscription_id.as_uuid())
        .bind(event.event_type.as_str())
        .bind(&event.description)
        .bind(properties)
        .bind(event.created_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to append subscription event", e))?;

        Ok(())
    }

    async fn delete_migrated(
        &mut self,
        migration_source: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<u64, DomainError> {
        // Audit events go with their subscription (ON DELETE CASCADE).
        let result = sqlx::query(
            r#"
            DELETE FROM subscriptions
            WHERE metadata ->> 'migration_source' = $1
              AND ($2::uuid IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(migration_source)
        .bind(tenant_id.map(|t| *t.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to delete migrated subscriptions", e))?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| db_error("Failed to roll back transaction", e))
    }
}
