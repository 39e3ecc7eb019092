//! Shared builders for billing handler tests.

use crate::domain::billing::{
    test_plan, EventObject, InvoiceSnapshot, Plan, ProviderEvent, ProviderEventType,
    SubscriptionSnapshot, SubscriptionStatus,
};
use crate::domain::foundation::Timestamp;

pub(crate) fn now() -> Timestamp {
    Timestamp::from_unix_secs(1_700_000_000).unwrap()
}

pub(crate) fn team_plan() -> Plan {
    test_plan("team", &[("users", 10)])
}

/// Active subscription snapshot for `external_id`.
pub(crate) fn snapshot(external_id: &str) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        external_subscription_id: external_id.to_string(),
        status: Some(SubscriptionStatus::Active),
        ..Default::default()
    }
}

pub(crate) fn subscription_event(
    event_id: &str,
    event_type: ProviderEventType,
    snapshot: SubscriptionSnapshot,
    occurred_at: i64,
) -> ProviderEvent {
    ProviderEvent {
        external_event_id: event_id.to_string(),
        event_type,
        occurred_at,
        object: EventObject::Subscription(snapshot),
    }
}

pub(crate) fn invoice_event(
    event_id: &str,
    event_type: ProviderEventType,
    external_subscription_id: &str,
    occurred_at: i64,
) -> ProviderEvent {
    ProviderEvent {
        external_event_id: event_id.to_string(),
        event_type,
        occurred_at,
        object: EventObject::Invoice(InvoiceSnapshot {
            invoice_id: format!("in_{}", event_id),
            external_subscription_id: Some(external_subscription_id.to_string()),
            attempt_count: 1,
            ..Default::default()
        }),
    }
}
