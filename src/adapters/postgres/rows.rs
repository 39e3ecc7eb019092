//! Row mapping and error translation shared by the Postgres adapters.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::billing::{
    FailedWebhookEvent, Subscription, SubscriptionEvent, SubscriptionMetadata,
};
use crate::domain::foundation::{
    DomainError, ErrorCode, FailedWebhookId, PlanId, SubscriptionEventId, SubscriptionId,
    TenantId, Timestamp,
};

/// Columns selected for every subscription read.
pub(super) const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, plan_id, external_subscription_id, \
     status, trial_ends_at, current_period_start, current_period_end, ends_at, \
     cancel_at_period_end, metadata, created_at, updated_at";

/// SQLSTATE for `lock_timeout` expiry.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";

/// Maps a sqlx error, keeping lock timeouts and constraint violations
/// distinguishable.
pub(super) fn db_error(context: &str, err: sqlx::Error) -> DomainError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => {
                return DomainError::new(ErrorCode::LockTimeout, format!("{}: {}", context, db_err))
            }
            Some(UNIQUE_VIOLATION) => {
                let mut error = DomainError::new(
                    ErrorCode::ConstraintViolation,
                    format!("{}: {}", context, db_err),
                );
                if let Some(constraint) = db_err.constraint() {
                    error = error.with_detail("constraint", constraint);
                }
                return error;
            }
            _ => {}
        }
    }
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, err))
}

fn ts(value: Option<DateTime<Utc>>) -> Option<Timestamp> {
    value.map(Timestamp::from_datetime)
}

pub(super) fn dt(value: Option<Timestamp>) -> Option<DateTime<Utc>> {
    value.map(|t| *t.as_datetime())
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct SubscriptionRow {
    id: Uuid,
    tenant_id: Uuid,
    plan_id: Uuid,
    external_subscription_id: Option<String>,
    status: String,
    trial_ends_at: Option<DateTime<Utc>>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let metadata = SubscriptionMetadata::from_value(row.metadata).map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid metadata on subscription {}: {}", row.id, e),
            )
        })?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            plan_id: PlanId::from_uuid(row.plan_id),
            external_subscription_id: row.external_subscription_id,
            status: row.status.parse()?,
            trial_ends_at: ts(row.trial_ends_at),
            current_period_start: ts(row.current_period_start),
            current_period_end: ts(row.current_period_end),
            ends_at: ts(row.ends_at),
            cancel_at_period_end: row.cancel_at_period_end,
            metadata,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

pub(super) fn into_subscriptions(rows: Vec<SubscriptionRow>) -> Result<Vec<Subscription>, DomainError> {
    rows.into_iter().map(Subscription::try_from).collect()
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct EventRow {
    id: Uuid,
    subscription_id: Uuid,
    event_type: String,
    description: String,
    properties: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for SubscriptionEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let properties = serde_json::from_value(row.properties).map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid properties on event {}: {}", row.id, e),
            )
        })?;
        Ok(SubscriptionEvent {
            id: SubscriptionEventId::from_uuid(row.id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            event_type: row.event_type.parse()?,
            description: row.description,
            properties,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct FailedWebhookRow {
    id: Uuid,
    provider: String,
    external_event_id: String,
    payload: Vec<u8>,
    error: String,
    attempts: i32,
    next_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl From<FailedWebhookRow> for FailedWebhookEvent {
    fn from(row: FailedWebhookRow) -> Self {
        FailedWebhookEvent {
            id: FailedWebhookId::from_uuid(row.id),
            provider: row.provider,
            external_event_id: row.external_event_id,
            payload: row.payload,
            error: row.error,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            next_retry_at: ts(row.next_retry_at),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            resolved_at: ts(row.resolved_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_map_to_database_error() {
        let err = db_error("load subscription", sqlx::Error::RowNotFound);
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(err.message.starts_with("load subscription"));
    }

    #[test]
    fn subscription_row_maps_status_and_metadata() {
        let now = Utc::now();
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            external_subscription_id: Some("sub_1".to_string()),
            status: "past_due".to_string(),
            trial_ends_at: None,
            current_period_start: Some(now),
            current_period_end: None,
            ends_at: Some(now),
            cancel_at_period_end: false,
            metadata: serde_json::json!({"version": 1, "notifications_sent": [7, 3]}),
            created_at: now,
            updated_at: now,
        };

        let sub = Subscription::try_from(row).unwrap();
        assert_eq!(sub.status, crate::domain::billing::SubscriptionStatus::PastDue);
        assert!(sub.metadata.has_notified(3));
        assert_eq!(sub.ends_at, Some(Timestamp::from_datetime(now)));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let now = Utc::now();
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            external_subscription_id: None,
            status: "paused".to_string(),
            trial_ends_at: None,
            current_period_start: None,
            current_period_end: None,
            ends_at: None,
            cancel_at_period_end: false,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        assert!(Subscription::try_from(row).is_err());
    }
}
