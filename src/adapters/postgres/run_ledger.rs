//! PostgreSQL implementation of SchedulerRunLedger.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::domain::foundation::DomainError;
use crate::ports::{SchedulerPass, SchedulerRunLedger};

use super::rows::db_error;

pub struct PostgresRunLedger {
    pool: PgPool,
}

impl PostgresRunLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchedulerRunLedger for PostgresRunLedger {
    async fn last_completed(&self, pass: SchedulerPass) -> Result<Option<NaiveDate>, DomainError> {
        sqlx::query_scalar::<_, NaiveDate>("SELECT last_completed FROM scheduler_runs WHERE pass = $1")
            .bind(pass.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to read scheduler run ledger", e))
    }

    async fn record_completed(&self, pass: SchedulerPass, date: NaiveDate) -> Result<(), DomainError> {
        // Never moves backwards, so a late run for an earlier day is harmless.
        sqlx::query(
            r#"
            INSERT INTO scheduler_runs (pass, last_completed, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (pass) DO UPDATE SET
                last_completed = GREATEST(scheduler_runs.last_completed, EXCLUDED.last_completed),
                updated_at = NOW()
            "#,
        )
        .bind(pass.as_str())
        .bind(date)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record scheduler run", e))?;

        Ok(())
    }
}
