//! Provider-neutral webhook event.
//!
//! Gateways parse their own payload formats into this shape. The pipeline
//! only ever sees a `ProviderEvent`.

use crate::domain::foundation::Timestamp;
use serde::{Deserialize, Serialize};

use super::{BillingPeriod, SubscriptionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    PaymentSucceeded,
    PaymentFailed,
    TrialWillEnd,
    Unknown(String),
}

impl ProviderEventType {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderEventType::SubscriptionCreated => "subscription_created",
            ProviderEventType::SubscriptionUpdated => "subscription_updated",
            ProviderEventType::SubscriptionCanceled => "subscription_canceled",
            ProviderEventType::PaymentSucceeded => "payment_succeeded",
            ProviderEventType::PaymentFailed => "payment_failed",
            ProviderEventType::TrialWillEnd => "trial_will_end",
            ProviderEventType::Unknown(raw) => raw,
        }
    }
}

/// Provider's view of a subscription at the time of the event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub external_subscription_id: String,
    pub customer_id: Option<String>,
    /// Provider status mapped onto ours. `None` if the provider used one we
    /// do not model.
    pub status: Option<SubscriptionStatus>,
    pub price_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub trial_end: Option<i64>,
    /// Tenant reference carried in provider metadata.
    pub tenant_ref: Option<String>,
}

impl SubscriptionSnapshot {
    pub fn period(&self) -> Option<BillingPeriod> {
        let start = Timestamp::from_unix_secs(self.current_period_start?)?;
        let end = Timestamp::from_unix_secs(self.current_period_end?)?;
        Some(BillingPeriod { start, end })
    }

    pub fn period_end(&self) -> Option<Timestamp> {
        self.current_period_end.and_then(Timestamp::from_unix_secs)
    }

    pub fn trial_ends_at(&self) -> Option<Timestamp> {
        self.trial_end.and_then(Timestamp::from_unix_secs)
    }
}

/// Provider's view of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub invoice_id: String,
    pub external_subscription_id: Option<String>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub attempt_count: u32,
}

impl InvoiceSnapshot {
    pub fn period(&self) -> Option<BillingPeriod> {
        let start = Timestamp::from_unix_secs(self.period_start?)?;
        let end = Timestamp::from_unix_secs(self.period_end?)?;
        Some(BillingPeriod { start, end })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventObject {
    Subscription(SubscriptionSnapshot),
    Invoice(InvoiceSnapshot),
    Other { raw: serde_json::Value },
}

/// A parsed, verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub external_event_id: String,
    pub event_type: ProviderEventType,
    /// Provider-side creation time, unix seconds.
    pub occurred_at: i64,
    pub object: EventObject,
}

impl ProviderEvent {
    /// Provider subscription this event targets, if any.
    pub fn external_subscription_id(&self) -> Option<&str> {
        match &self.object {
            EventObject::Subscription(sub) => Some(sub.external_subscription_id.as_str()),
            EventObject::Invoice(invoice) => invoice.external_subscription_id.as_deref(),
            EventObject::Other { .. } => None,
        }
    }

    pub fn subscription(&self) -> Option<&SubscriptionSnapshot> {
        match &self.object {
            EventObject::Subscription(sub) => Some(sub),
            _ => None,
        }
    }

    pub fn invoice(&self) -> Option<&InvoiceSnapshot> {
        match &self.object {
            EventObject::Invoice(invoice) => Some(invoice),
            _ => None,
        }
    }
}
