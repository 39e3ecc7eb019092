//! Plan limit decisions.
//!
//! Pure evaluation of "may this tenant consume `delta` more of `resource`".
//! Loading the subscription, plan and usage is the caller's job.

use crate::domain::foundation::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{GracePolicy, Plan, Subscription, SubscriptionStatus};

/// Why a check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NoSubscription,
    SubscriptionPastDue,
    SubscriptionExpired,
    SubscriptionCanceled,
    SubscriptionUnpaid,
    SubscriptionIncomplete,
    LimitExceeded,
    FeatureNotIncluded,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NoSubscription => "no_subscription",
            DenyReason::SubscriptionPastDue => "subscription_past_due",
            DenyReason::SubscriptionExpired => "subscription_expired",
            DenyReason::SubscriptionCanceled => "subscription_canceled",
            DenyReason::SubscriptionUnpaid => "subscription_unpaid",
            DenyReason::SubscriptionIncomplete => "subscription_incomplete",
            DenyReason::LimitExceeded => "limit_exceeded",
            DenyReason::FeatureNotIncluded => "feature_not_included",
        }
    }

    /// Message suitable for showing to the tenant.
    pub fn user_message(&self) -> &'static str {
        match self {
            DenyReason::NoSubscription => "No subscription found. Choose a plan to continue.",
            DenyReason::SubscriptionPastDue => {
                "Your payment is overdue and the grace period has ended."
            }
            DenyReason::SubscriptionExpired => "Your subscription has expired.",
            DenyReason::SubscriptionCanceled => "Your subscription has been canceled.",
            DenyReason::SubscriptionUnpaid => "Your subscription is unpaid.",
            DenyReason::SubscriptionIncomplete => "Your first payment has not completed yet.",
            DenyReason::LimitExceeded => "You have reached the limit of your plan.",
            DenyReason::FeatureNotIncluded => "This feature is not included in your plan.",
        }
    }

    /// Deny reason keyed to a status that is not currently valid.
    fn for_status(status: SubscriptionStatus) -> Self {
        match status {
            SubscriptionStatus::PastDue => DenyReason::SubscriptionPastDue,
            SubscriptionStatus::Canceled => DenyReason::SubscriptionCanceled,
            SubscriptionStatus::Unpaid => DenyReason::SubscriptionUnpaid,
            SubscriptionStatus::Incomplete => DenyReason::SubscriptionIncomplete,
            SubscriptionStatus::Expired
            | SubscriptionStatus::IncompleteExpired
            | SubscriptionStatus::Trialing
            | SubscriptionStatus::Active => DenyReason::SubscriptionExpired,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a limit or feature check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LimitDecision {
    Allow,
    Deny {
        reason: DenyReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        current: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<u64>,
    },
}

impl LimitDecision {
    pub fn deny(reason: DenyReason) -> Self {
        LimitDecision::Deny {
            reason,
            current: None,
            max: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allow)
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            LimitDecision::Allow => None,
            LimitDecision::Deny { reason, .. } => Some(*reason),
        }
    }
}

/// Denial for a missing or no-longer-valid subscription, if any.
pub fn subscription_gate(
    subscription: Option<&Subscription>,
    policy: &GracePolicy,
    now: Timestamp,
) -> Option<LimitDecision> {
    match subscription {
        None => Some(LimitDecision::deny(DenyReason::NoSubscription)),
        Some(sub) if !sub.is_valid(policy, now) => {
            Some(LimitDecision::deny(DenyReason::for_status(sub.status)))
        }
        Some(_) => None,
    }
}

/// Compares `current_usage + delta` against the plan's cap for `resource`.
pub fn evaluate_limit(plan: &Plan, resource: &str, current_usage: u64, delta: u64) -> LimitDecision {
    let Some(max) = plan.limit_for(resource) else {
        return LimitDecision::Allow;
    };
    if current_usage.saturating_add(delta) > max {
        LimitDecision::Deny {
            reason: DenyReason::LimitExceeded,
            current: Some(current_usage),
            max: Some(max),
        }
    } else {
        LimitDecision::Allow
    }
}

pub fn evaluate_feature(plan: &Plan, feature: &str) -> LimitDecision {
    if plan.includes_feature(feature) {
        LimitDecision::Allow
    } else {
        LimitDecision::deny(DenyReason::FeatureNotIncluded)
    }
}
