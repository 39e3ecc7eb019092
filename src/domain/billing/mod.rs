//! Billing domain - tenant subscription lifecycle.
//!
//! The subscription state machine, grace policy, plan limits and the
//! provider-neutral webhook event model.

mod aggregate;
mod errors;
mod events;
mod failed_webhook;
mod grace;
mod limits;
mod metadata;
mod plan;
mod provider_event;
mod status;

pub use aggregate::{
    BillingPeriod, LifecycleTrigger, NewSubscription, Subscription, Transition,
    TransitionOutcome,
};
pub use errors::BillingError;
pub use events::{SubscriptionEvent, SubscriptionEventType};
pub use failed_webhook::{FailedWebhookEvent, RetryPolicy};
pub use grace::{GracePolicy, DEFAULT_GRACE_DAYS, DEFAULT_NOTIFICATION_DAYS};
pub use limits::{evaluate_feature, evaluate_limit, subscription_gate, DenyReason, LimitDecision};
pub use metadata::{
    SubscriptionMetadata, BACKFILL_SOURCE, METADATA_VERSION, PROVIDER_CUSTOMER_KEY,
};
pub use plan::{BillingInterval, Plan};
pub use provider_event::{
    EventObject, InvoiceSnapshot, ProviderEvent, ProviderEventType, SubscriptionSnapshot,
};
pub use status::SubscriptionStatus;

#[cfg(test)]
pub(crate) use aggregate::test_subscription;
#[cfg(test)]
pub(crate) use plan::test_plan;
