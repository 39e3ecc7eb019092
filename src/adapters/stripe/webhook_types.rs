//! Stripe-specific types for webhook handling.
//!
//! These types represent Stripe API objects as they arrive in webhook payloads
//! and API responses. They are converted into the provider-neutral
//! [`ProviderEvent`] before anything else sees them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::billing::{
    EventObject, InvoiceSnapshot, ProviderEvent, ProviderEventType, SubscriptionSnapshot,
    SubscriptionStatus,
};

/// Metadata key carrying our tenant id on Stripe objects.
pub const TENANT_METADATA_KEY: &str = "tenant_id";

// ════════════════════════════════════════════════════════════════════════════════
// Signature Parsing
// ════════════════════════════════════════════════════════════════════════════════

/// Error parsing the Stripe-Signature header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureParseError {
    #[error("Missing Stripe-Signature header")]
    MissingHeader,
    #[error("Missing timestamp (t=) in signature")]
    MissingTimestamp,
    #[error("Missing v1 signature in header")]
    MissingV1Signature,
    #[error("Invalid timestamp format")]
    InvalidTimestamp,
    #[error("Invalid signature format (not valid hex)")]
    InvalidSignatureFormat,
}

/// Parsed Stripe-Signature header components.
///
/// The header format is: `t=timestamp,v1=signature[,v1=signature...]`.
/// Stripe sends one `v1` entry per active signing secret while a secret is
/// being rolled.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    /// Unix timestamp when Stripe signed the delivery.
    pub timestamp: i64,

    /// HMAC-SHA256 signatures, decoded from hex.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureParseError> {
        if header.trim().is_empty() {
            return Err(SignatureParseError::MissingHeader);
        }

        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| SignatureParseError::InvalidTimestamp)?,
                    );
                }
                "v1" => {
                    let bytes = hex::decode(value.trim())
                        .map_err(|_| SignatureParseError::InvalidSignatureFormat)?;
                    v1_signatures.push(bytes);
                }
                // v0 and unknown schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureParseError::MissingTimestamp)?;
        if v1_signatures.is_empty() {
            return Err(SignatureParseError::MissingV1Signature);
        }
        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Event Types
// ════════════════════════════════════════════════════════════════════════════════

/// Raw Stripe webhook event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeWebhookEvent {
    /// Unique event identifier (evt_...).
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp when the event was created.
    pub created: i64,

    pub data: StripeEventData,

    #[serde(default)]
    pub livemode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,

    /// Previous values for updated fields (on update events).
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Object Types
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCustomer {
    /// Unique customer identifier (cus_...).
    pub id: String,

    pub email: Option<String>,

    pub name: Option<String>,

    #[serde(default)]
    pub created: i64,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscription {
    /// Unique subscription identifier (sub_...).
    pub id: String,

    pub customer: String,

    pub status: String,

    pub current_period_start: Option<i64>,

    pub current_period_end: Option<i64>,

    #[serde(default)]
    pub cancel_at_period_end: bool,

    pub canceled_at: Option<i64>,

    pub trial_end: Option<i64>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

impl StripeSubscription {
    /// Price of the first item. Plans are single-item subscriptions.
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    pub fn item_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.id.as_str())
    }

    pub fn to_snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            external_subscription_id: self.id.clone(),
            customer_id: Some(self.customer.clone()),
            status: map_subscription_status(&self.status),
            price_id: self.price_id().map(String::from),
            cancel_at_period_end: self.cancel_at_period_end,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            trial_end: self.trial_end,
            tenant_ref: self.metadata.get(TENANT_METADATA_KEY).cloned(),
        }
    }
}

/// Stripe list envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoice {
    /// Unique invoice identifier (in_...).
    pub id: String,

    pub customer: Option<String>,

    pub subscription: Option<String>,

    #[serde(default)]
    pub attempt_count: u32,

    pub period_start: Option<i64>,

    pub period_end: Option<i64>,

    #[serde(default)]
    pub lines: StripeList<StripeInvoiceLine>,
}

impl StripeInvoice {
    /// Service period paid for. Line periods describe the period being
    /// billed; the invoice's own bounds are a fallback.
    pub fn to_snapshot(&self) -> InvoiceSnapshot {
        let (period_start, period_end) = match self.lines.data.first() {
            Some(line) => (Some(line.period.start), Some(line.period.end)),
            None => (self.period_start, self.period_end),
        };
        InvoiceSnapshot {
            invoice_id: self.id.clone(),
            external_subscription_id: self.subscription.clone(),
            period_start,
            period_end,
            attempt_count: self.attempt_count,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoiceLine {
    pub id: String,
    pub period: StripePeriod,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePeriod {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCheckoutSession {
    /// Unique session identifier (cs_...).
    pub id: String,

    /// Hosted checkout URL.
    pub url: Option<String>,

    pub expires_at: Option<i64>,
}

/// Error body returned by the Stripe API.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    pub error: StripeApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeApiError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Mapping
// ════════════════════════════════════════════════════════════════════════════════

/// Maps a Stripe subscription status onto ours. `paused` has no
/// counterpart.
pub fn map_subscription_status(status: &str) -> Option<SubscriptionStatus> {
    match status {
        "trialing" => Some(SubscriptionStatus::Trialing),
        "active" => Some(SubscriptionStatus::Active),
        "past_due" => Some(SubscriptionStatus::PastDue),
        "canceled" => Some(SubscriptionStatus::Canceled),
        "unpaid" => Some(SubscriptionStatus::Unpaid),
        "incomplete" => Some(SubscriptionStatus::Incomplete),
        "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
        _ => None,
    }
}

pub fn map_event_type(event_type: &str) -> ProviderEventType {
    match event_type {
        "customer.subscription.created" => ProviderEventType::SubscriptionCreated,
        "customer.subscription.updated" => ProviderEventType::SubscriptionUpdated,
        "customer.subscription.deleted" => ProviderEventType::SubscriptionCanceled,
        "customer.subscription.trial_will_end" => ProviderEventType::TrialWillEnd,
        "invoice.payment_succeeded" | "invoice.paid" => ProviderEventType::PaymentSucceeded,
        "invoice.payment_failed" => ProviderEventType::PaymentFailed,
        other => ProviderEventType::Unknown(other.to_string()),
    }
}

impl StripeWebhookEvent {
    /// Converts the envelope into the provider-neutral event.
    pub fn into_provider_event(self) -> Result<ProviderEvent, serde_json::Error> {
        let object = if self.event_type.starts_with("customer.subscription.") {
            let sub: StripeSubscription = serde_json::from_value(self.data.object)?;
            EventObject::Subscription(sub.to_snapshot())
        } else if self.event_type.starts_with("invoice.") {
            let invoice: StripeInvoice = serde_json::from_value(self.data.object)?;
            EventObject::Invoice(invoice.to_snapshot())
        } else {
            EventObject::Other {
                raw: self.data.object,
            }
        };

        Ok(ProviderEvent {
            external_event_id: self.id,
            event_type: map_event_type(&self.event_type),
            occurred_at: self.created,
            object,
        })
    }
}
