//! Subscription aggregate.
//!
//! A tenant owns at most one current subscription (Trialing, Active or
//! PastDue). Every change goes through [`Subscription::apply`], which takes the
//! subscription by value and hands back the next value together with the
//! audit entry describing what happened. Edges the state machine does not
//! know are absorbed as ignored transitions instead of failing.
//!
//! # Design Decisions
//!
//! - **Explicit time**: callers pass `now`; nothing reads the clock here
//! - **Ignored is not an error**: unmatched triggers produce an
//!   `ignored_transition` audit entry and leave the status unchanged
//! - **Terminal rows stay terminal**: resubscribing creates a new row

use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, StateMachine, SubscriptionId, TenantId, Timestamp,
};
use serde::{Deserialize, Serialize};

use super::{
    GracePolicy, SubscriptionEvent, SubscriptionEventType, SubscriptionMetadata,
    SubscriptionStatus,
};

/// Start and end of one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Something that may move a subscription along its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleTrigger {
    PaymentSucceeded { period: Option<BillingPeriod> },
    PaymentFailed,
    /// Provider stopped retrying a failed payment.
    RetriesExhausted,
    /// Cancellation requested for the end of the current period.
    CancellationScheduled { ends_at: Option<Timestamp> },
    /// A scheduled cancellation was withdrawn.
    CancellationResumed,
    Canceled { at_period_end: bool },
    PlanChanged { plan_id: PlanId },
    /// First payment window closed without a charge.
    IncompleteExpired,
    /// Scheduler sweep: expire if the grace deadline has passed.
    DeadlineReached,
}

impl LifecycleTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleTrigger::PaymentSucceeded { .. } => "payment_succeeded",
            LifecycleTrigger::PaymentFailed => "payment_failed",
            LifecycleTrigger::RetriesExhausted => "retries_exhausted",
            LifecycleTrigger::CancellationScheduled { .. } => "cancellation_scheduled",
            LifecycleTrigger::CancellationResumed => "cancellation_resumed",
            LifecycleTrigger::Canceled { .. } => "canceled",
            LifecycleTrigger::PlanChanged { .. } => "plan_changed",
            LifecycleTrigger::IncompleteExpired => "incomplete_expired",
            LifecycleTrigger::DeadlineReached => "deadline_reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
    Ignored {
        reason: String,
    },
}

/// Result of applying a trigger: the next value plus its audit entry.
#[derive(Debug, Clone)]
pub struct Transition {
    pub subscription: Subscription,
    pub event: SubscriptionEvent,
    pub outcome: TransitionOutcome,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, TransitionOutcome::Applied { .. })
    }
}

/// Parameters for a new subscription row.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: TenantId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub external_subscription_id: Option<String>,
    pub trial_ends_at: Option<Timestamp>,
    pub current_period: Option<BillingPeriod>,
    pub cancel_at_period_end: bool,
    pub metadata: SubscriptionMetadata,
}

/// Subscription aggregate.
///
/// # Invariants
///
/// - `ends_at` is only set while a deadline applies (PastDue grace or a
///   cancellation taking effect at period end)
/// - `metadata.notifications_sent` only grows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub plan_id: PlanId,
    pub external_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<Timestamp>,
    pub current_period_start: Option<Timestamp>,
    pub current_period_end: Option<Timestamp>,
    pub ends_at: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub metadata: SubscriptionMetadata,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a subscription and its `created` audit entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if the initial status is not one a
    /// new subscription can start in.
    pub fn create(
        params: NewSubscription,
        now: Timestamp,
    ) -> Result<(Self, SubscriptionEvent), DomainError> {
        if !matches!(
            params.status,
            SubscriptionStatus::Trialing | SubscriptionStatus::Active | SubscriptionStatus::Incomplete
        ) {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("A subscription cannot start as {}", params.status),
            ));
        }

        let subscription = Self {
            id: SubscriptionId::new(),
            tenant_id: params.tenant_id,
            plan_id: params.plan_id,
            external_subscription_id: params.external_subscription_id,
            status: params.status,
            trial_ends_at: params.trial_ends_at,
            current_period_start: params.current_period.map(|p| p.start),
            current_period_end: params.current_period.map(|p| p.end),
            ends_at: None,
            cancel_at_period_end: params.cancel_at_period_end,
            metadata: params.metadata,
            created_at: now,
            updated_at: now,
        };

        let mut event = SubscriptionEvent::new(
            subscription.id,
            SubscriptionEventType::Created,
            "Subscription created",
            now,
        )
        .with_property("status", subscription.status.as_str())
        .with_property("plan_id", subscription.plan_id.to_string())
        .with_property("tenant_id", subscription.tenant_id.to_string());
        if let Some(source) = &subscription.metadata.migration_source {
            event = event.with_property("migration_source", source.as_str());
        }

        Ok((subscription, event))
    }

    /// Whether the tenant may use the product at `now`.
    ///
    /// Trialing and Active are valid. PastDue is valid strictly before the
    /// grace deadline. Everything else is not.
    pub fn is_valid(&self, policy: &GracePolicy, now: Timestamp) -> bool {
        match self.status {
            SubscriptionStatus::Trialing | SubscriptionStatus::Active => true,
            SubscriptionStatus::PastDue => policy
                .grace_deadline(self)
                .map(|deadline| now < deadline)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_migrated(&self) -> bool {
        self.metadata.is_migrated()
    }

    /// Applies a lifecycle trigger.
    pub fn apply(
        self,
        trigger: &LifecycleTrigger,
        policy: &GracePolicy,
        now: Timestamp,
    ) -> Transition {
        if self.status.is_terminal() {
            return self.ignore(trigger, "subscription is in a terminal state", now);
        }

        match trigger {
            LifecycleTrigger::PaymentSucceeded { period } => {
                self.payment_succeeded(trigger, *period, now)
            }
            LifecycleTrigger::PaymentFailed => self.payment_failed(trigger, policy, now),
            LifecycleTrigger::RetriesExhausted => self.retries_exhausted(trigger, policy, now),
            LifecycleTrigger::CancellationScheduled { ends_at } => {
                self.schedule_cancellation(trigger, *ends_at, now)
            }
            LifecycleTrigger::CancellationResumed => self.resume(trigger, now),
            LifecycleTrigger::Canceled { at_period_end } => {
                self.cancel(trigger, *at_period_end, now)
            }
            LifecycleTrigger::PlanChanged { plan_id } => self.change_plan(trigger, *plan_id, now),
            LifecycleTrigger::IncompleteExpired => {
                if self.status != SubscriptionStatus::Incomplete {
                    return self.ignore(trigger, "subscription is not incomplete", now);
                }
                self.move_to(
                    trigger,
                    SubscriptionStatus::IncompleteExpired,
                    SubscriptionEventType::Expired,
                    "First payment window closed",
                    now,
                )
            }
            LifecycleTrigger::DeadlineReached => self.expire(trigger, policy, now),
        }
    }

    /// Leaves the subscription untouched and records why.
    pub fn ignore(
        self,
        trigger: &LifecycleTrigger,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Transition {
        let reason = reason.into();
        let event = SubscriptionEvent::new(
            self.id,
            SubscriptionEventType::IgnoredTransition,
            format!("Ignored {} while {}", trigger.name(), self.status),
            now,
        )
        .with_property("trigger", trigger.name())
        .with_property("status", self.status.as_str())
        .with_property("reason", reason.as_str());

        Transition {
            subscription: self,
            event,
            outcome: TransitionOutcome::Ignored { reason },
        }
    }

    /// Records a delivered grace reminder for `day`.
    ///
    /// Returns `None` when that day was already recorded.
    pub fn record_notification(
        mut self,
        day: u32,
        grace_deadline: Timestamp,
        now: Timestamp,
    ) -> Option<(Self, SubscriptionEvent)> {
        if !self.metadata.record_notification(day) {
            return None;
        }
        self.updated_at = now;
        let event = SubscriptionEvent::new(
            self.id,
            SubscriptionEventType::NotificationSent,
            format!("Grace reminder sent {} day(s) before deadline", day),
            now,
        )
        .with_property("day", day)
        .with_property("grace_deadline", grace_deadline.to_string());
        Some((self, event))
    }

    fn payment_succeeded(
        mut self,
        trigger: &LifecycleTrigger,
        period: Option<BillingPeriod>,
        now: Timestamp,
    ) -> Transition {
        let event_type = match self.status {
            SubscriptionStatus::Trialing => SubscriptionEventType::TrialConverted,
            SubscriptionStatus::Active => SubscriptionEventType::Renewed,
            SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid => {
                SubscriptionEventType::PaymentRecovered
            }
            SubscriptionStatus::Incomplete => SubscriptionEventType::Activated,
            _ => return self.ignore(trigger, "no payment edge from this status", now),
        };

        if let Some(period) = period {
            self.current_period_start = Some(period.start);
            self.current_period_end = Some(period.end);
        }
        self.ends_at = if self.cancel_at_period_end {
            self.current_period_end
        } else {
            None
        };

        self.move_to(
            trigger,
            SubscriptionStatus::Active,
            event_type,
            "Payment succeeded",
            now,
        )
    }

    fn payment_failed(
        mut self,
        trigger: &LifecycleTrigger,
        policy: &GracePolicy,
        now: Timestamp,
    ) -> Transition {
        if self.status != SubscriptionStatus::Active {
            return self.ignore(trigger, "only active subscriptions enter grace", now);
        }
        let deadline = policy.deadline_from(now);
        self.ends_at = Some(deadline);

        let mut transition = self.move_to(
            trigger,
            SubscriptionStatus::PastDue,
            SubscriptionEventType::PaymentFailed,
            "Payment failed; grace period started",
            now,
        );
        transition.event = transition
            .event
            .with_property("grace_deadline", deadline.to_string())
            .with_property("grace_days", policy.grace_days);
        transition
    }

    fn retries_exhausted(
        mut self,
        trigger: &LifecycleTrigger,
        policy: &GracePolicy,
        now: Timestamp,
    ) -> Transition {
        if self.status != SubscriptionStatus::PastDue {
            return self.ignore(trigger, "subscription is not past due", now);
        }
        if self.ends_at.is_none() {
            self.ends_at = Some(policy.deadline_from(now));
        }
        self.move_to(
            trigger,
            SubscriptionStatus::Unpaid,
            SubscriptionEventType::RetriesExhausted,
            "Provider stopped retrying payment",
            now,
        )
    }

    fn schedule_cancellation(
        mut self,
        trigger: &LifecycleTrigger,
        ends_at: Option<Timestamp>,
        now: Timestamp,
    ) -> Transition {
        if !self.status.is_current() {
            return self.ignore(trigger, "only current subscriptions can schedule cancellation", now);
        }
        if self.cancel_at_period_end {
            return self.ignore(trigger, "cancellation already scheduled", now);
        }

        self.cancel_at_period_end = true;
        if self.status != SubscriptionStatus::PastDue {
            // PastDue keeps its grace deadline.
            self.ends_at = Some(
                ends_at
                    .or(self.current_period_end)
                    .or(self.trial_ends_at)
                    .unwrap_or(now),
            );
        }
        let ends = self.ends_at;
        let mut transition = self.annotate(
            SubscriptionEventType::CancellationScheduled,
            "Cancellation scheduled for period end",
            now,
        );
        if let Some(ends) = ends {
            transition.event = transition.event.with_property("ends_at", ends.to_string());
        }
        transition
    }

    fn resume(mut self, trigger: &LifecycleTrigger, now: Timestamp) -> Transition {
        if !self.cancel_at_period_end || !self.status.is_current() {
            return self.ignore(trigger, "no scheduled cancellation to resume", now);
        }
        self.cancel_at_period_end = false;
        if self.status != SubscriptionStatus::PastDue {
            self.ends_at = None;
        }
        self.annotate(
            SubscriptionEventType::Resumed,
            "Scheduled cancellation withdrawn",
            now,
        )
    }

    fn cancel(mut self, trigger: &LifecycleTrigger, at_period_end: bool, now: Timestamp) -> Transition {
        if !self.status.can_transition_to(&SubscriptionStatus::Canceled) {
            return self.ignore(trigger, "no cancel edge from this status", now);
        }

        let ends_at = if at_period_end {
            self.current_period_end
                .filter(|end| end.is_after(&now))
                .unwrap_or(now)
        } else {
            now
        };
        self.ends_at = Some(ends_at);
        self.cancel_at_period_end = at_period_end;

        let mut transition = self.move_to(
            trigger,
            SubscriptionStatus::Canceled,
            SubscriptionEventType::Canceled,
            if at_period_end {
                "Canceled at period end"
            } else {
                "Canceled immediately"
            },
            now,
        );
        transition.event = transition
            .event
            .with_property("ends_at", ends_at.to_string())
            .with_property("at_period_end", at_period_end);
        transition
    }

    fn change_plan(mut self, trigger: &LifecycleTrigger, plan_id: PlanId, now: Timestamp) -> Transition {
        if self.plan_id == plan_id {
            return self.ignore(trigger, "plan unchanged", now);
        }
        let previous = self.plan_id;
        self.plan_id = plan_id;

        let mut transition = self.annotate(SubscriptionEventType::PlanChanged, "Plan changed", now);
        transition.event = transition
            .event
            .with_property("from_plan_id", previous.to_string())
            .with_property("to_plan_id", plan_id.to_string());
        transition
    }

    fn expire(self, trigger: &LifecycleTrigger, policy: &GracePolicy, now: Timestamp) -> Transition {
        if !self.status.is_deadline_bound() {
            return self.ignore(trigger, "status has no grace deadline", now);
        }
        let Some(deadline) = policy.grace_deadline(&self) else {
            return self.ignore(trigger, "no grace deadline recorded", now);
        };
        if now < deadline {
            return self.ignore(trigger, "grace deadline not reached", now);
        }

        let mut transition = self.move_to(
            trigger,
            SubscriptionStatus::Expired,
            SubscriptionEventType::Expired,
            "Grace deadline passed",
            now,
        );
        transition.event = transition
            .event
            .with_property("grace_deadline", deadline.to_string());
        transition
    }

    /// Status change guarded by the edge table.
    fn move_to(
        mut self,
        trigger: &LifecycleTrigger,
        to: SubscriptionStatus,
        event_type: SubscriptionEventType,
        description: &str,
        now: Timestamp,
    ) -> Transition {
        let from = self.status;
        match from.transition_to(to) {
            Ok(next) => self.status = next,
            Err(err) => return self.ignore(trigger, err.message, now),
        }
        self.updated_at = now;

        let event = SubscriptionEvent::new(self.id, event_type, description, now)
            .with_property("from", from.as_str())
            .with_property("to", to.as_str());

        Transition {
            subscription: self,
            event,
            outcome: TransitionOutcome::Applied { from, to },
        }
    }

    /// Change that keeps the current status.
    fn annotate(
        mut self,
        event_type: SubscriptionEventType,
        description: &str,
        now: Timestamp,
    ) -> Transition {
        self.updated_at = now;
        let status = self.status;
        let event = SubscriptionEvent::new(self.id, event_type, description, now)
            .with_property("from", status.as_str())
            .with_property("to", status.as_str());
        Transition {
            subscription: self,
            event,
            outcome: TransitionOutcome::Applied {
                from: status,
                to: status,
            },
        }
    }
}

#[cfg(test)]
pub(crate) fn test_subscription(status: SubscriptionStatus) -> Subscription {
    let now = Timestamp::from_unix_secs(1_690_000_000).unwrap_or_default();
    let id = SubscriptionId::new();
    Subscription {
        id,
        tenant_id: TenantId::new(),
        plan_id: PlanId::new(),
        external_subscription_id: Some(format!("sub_{}", id)),
        status,
        trial_ends_at: None,
        current_period_start: None,
        current_period_end: None,
        ends_at: None,
        cancel_at_period_end: false,
        metadata: SubscriptionMetadata::default(),
        created_at: now,
        updated_at: now,
    }
}
