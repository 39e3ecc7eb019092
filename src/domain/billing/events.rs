//! Subscription audit log entries.
//!
//! One entry is appended for every applied or explicitly ignored transition.
//! Entries are never updated.

use crate::domain::foundation::{
    DomainError, ErrorCode, SubscriptionEventId, SubscriptionId, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventType {
    Created,
    Activated,
    TrialConverted,
    Renewed,
    PaymentFailed,
    PaymentRecovered,
    RetriesExhausted,
    CancellationScheduled,
    Resumed,
    Canceled,
    PlanChanged,
    Expired,
    NotificationSent,
    IgnoredTransition,
    StaleEventDiscarded,
}

impl SubscriptionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Activated => "activated",
            Self::TrialConverted => "trial_converted",
            Self::Renewed => "renewed",
            Self::PaymentFailed => "payment_failed",
            Self::PaymentRecovered => "payment_recovered",
            Self::RetriesExhausted => "retries_exhausted",
            Self::CancellationScheduled => "cancellation_scheduled",
            Self::Resumed => "resumed",
            Self::Canceled => "canceled",
            Self::PlanChanged => "plan_changed",
            Self::Expired => "expired",
            Self::NotificationSent => "notification_sent",
            Self::IgnoredTransition => "ignored_transition",
            Self::StaleEventDiscarded => "stale_event_discarded",
        }
    }

    const ALL: [SubscriptionEventType; 15] = [
        Self::Created,
        Self::Activated,
        Self::TrialConverted,
        Self::Renewed,
        Self::PaymentFailed,
        Self::PaymentRecovered,
        Self::RetriesExhausted,
        Self::CancellationScheduled,
        Self::Resumed,
        Self::Canceled,
        Self::PlanChanged,
        Self::Expired,
        Self::NotificationSent,
        Self::IgnoredTransition,
        Self::StaleEventDiscarded,
    ];
}

impl fmt::Display for SubscriptionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionEventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::InvalidFormat,
                    format!("Invalid subscription event type: {}", s),
                )
            })
    }
}

/// Append-only audit record for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub id: SubscriptionEventId,
    pub subscription_id: SubscriptionId,
    pub event_type: SubscriptionEventType,
    pub description: String,
    pub properties: BTreeMap<String, Value>,
    pub created_at: Timestamp,
}

impl SubscriptionEvent {
    pub fn new(
        subscription_id: SubscriptionId,
        event_type: SubscriptionEventType,
        description: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: SubscriptionEventId::new(),
            subscription_id,
            event_type,
            description: description.into(),
            properties: BTreeMap::new(),
            created_at,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}
