//! Grace period policy.
//!
//! A subscription's grace deadline is `ends_at` when set, otherwise
//! `trial_ends_at + grace_days`. Everything that asks "when does access end"
//! goes through [`GracePolicy::grace_deadline`].

use crate::domain::foundation::{Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Subscription, SubscriptionStatus};

pub const DEFAULT_GRACE_DAYS: u32 = 7;
pub const DEFAULT_NOTIFICATION_DAYS: [u32; 3] = [7, 3, 1];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePolicy {
    pub grace_days: u32,

    /// Days-before-deadline on which a reminder is due.
    pub notification_days: BTreeSet<u32>,
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_DAYS, DEFAULT_NOTIFICATION_DAYS)
    }
}

impl GracePolicy {
    pub fn new(grace_days: u32, notification_days: impl IntoIterator<Item = u32>) -> Self {
        Self {
            grace_days,
            notification_days: notification_days.into_iter().collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grace_days == 0 || self.grace_days > 90 {
            return Err(ValidationError::out_of_range(
                "grace_days",
                1,
                90,
                i64::from(self.grace_days),
            ));
        }
        if self.notification_days.contains(&0) {
            return Err(ValidationError::invalid_format(
                "notification_days",
                "trigger days must be positive",
            ));
        }
        Ok(())
    }

    /// `now + grace_days`, the deadline set when a payment fails.
    pub fn deadline_from(&self, now: Timestamp) -> Timestamp {
        now.add_days(i64::from(self.grace_days))
    }

    /// Canonical grace deadline: `ends_at ?? (trial_ends_at + grace_days)`.
    pub fn grace_deadline(&self, subscription: &Subscription) -> Option<Timestamp> {
        subscription.ends_at.or_else(|| {
            subscription
                .trial_ends_at
                .map(|trial_end| trial_end.add_days(i64::from(self.grace_days)))
        })
    }

    /// `ceil((grace_deadline - now) / 1 day)`, if a deadline exists.
    pub fn days_until_expiration(
        &self,
        subscription: &Subscription,
        now: Timestamp,
    ) -> Option<i64> {
        self.grace_deadline(subscription)
            .map(|deadline| deadline.days_from(&now))
    }

    /// Whether the deadline has been reached at `now`.
    pub fn deadline_passed(&self, subscription: &Subscription, now: Timestamp) -> bool {
        self.grace_deadline(subscription)
            .map(|deadline| now >= deadline)
            .unwrap_or(false)
    }

    /// The trigger day due for a reminder at `now`, if any.
    ///
    /// Only past-due subscriptions and trials with a known end are eligible.
    /// A day already recorded in the metadata is never due again.
    pub fn due_notification_day(&self, subscription: &Subscription, now: Timestamp) -> Option<u32> {
        let eligible = match subscription.status {
            SubscriptionStatus::PastDue => true,
            SubscriptionStatus::Trialing => subscription.trial_ends_at.is_some(),
            _ => false,
        };
        if !eligible {
            return None;
        }

        let days = self.days_until_expiration(subscription, now)?;
        let day = u32::try_from(days).ok()?;
        if self.notification_days.contains(&day) && !subscription.metadata.has_notified(day) {
            Some(day)
        } else {
            None
        }
    }

    pub fn max_notification_day(&self) -> u32 {
        self.notification_days.iter().next_back().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::aggregate::test_subscription;

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000).unwrap()
    }

    #[test]
    fn ends_at_wins_over_trial_end() {
        let policy = GracePolicy::default();
        let mut sub = test_subscription(SubscriptionStatus::PastDue);
        sub.trial_ends_at = Some(now());
        sub.ends_at = Some(now().add_days(2));

        assert_eq!(policy.grace_deadline(&sub), Some(now().add_days(2)));
    }

    #[test]
    fn trial_deadline_adds_grace_days() {
        let policy = GracePolicy::new(5, [1]);
        let mut sub = test_subscription(SubscriptionStatus::Trialing);
        sub.trial_ends_at = Some(now());

        assert_eq!(policy.grace_deadline(&sub), Some(now().add_days(5)));
    }

    #[test]
    fn no_deadline_without_dates() {
        let policy = GracePolicy::default();
        let sub = test_subscription(SubscriptionStatus::Active);
        assert_eq!(policy.grace_deadline(&sub), None);
        assert!(!policy.deadline_passed(&sub, now()));
    }

    #[test]
    fn due_day_matches_configured_trigger() {
        let policy = GracePolicy::default();
        let mut sub = test_subscription(SubscriptionStatus::PastDue);
        sub.ends_at = Some(now().add_days(3));

        assert_eq!(policy.due_notification_day(&sub, now()), Some(3));
    }

    #[test]
    fn partial_day_rounds_up_to_trigger() {
        let policy = GracePolicy::default();
        let mut sub = test_subscription(SubscriptionStatus::PastDue);
        sub.ends_at = Some(now().add_days(2).plus_secs(60));

        assert_eq!(policy.due_notification_day(&sub, now()), Some(3));
    }

    #[test]
    fn non_trigger_day_is_not_due() {
        let policy = GracePolicy::default();
        let mut sub = test_subscription(SubscriptionStatus::PastDue);
        sub.ends_at = Some(now().add_days(5));

        assert_eq!(policy.due_notification_day(&sub, now()), None);
    }

    #[test]
    fn already_notified_day_is_not_due() {
        let policy = GracePolicy::default();
        let mut sub = test_subscription(SubscriptionStatus::PastDue);
        sub.ends_at = Some(now().add_days(3));
        sub.metadata.record_notification(3);

        assert_eq!(policy.due_notification_day(&sub, now()), None);
    }

    #[test]
    fn canceled_subscriptions_are_never_notified() {
        let policy = GracePolicy::default();
        let mut sub = test_subscription(SubscriptionStatus::Canceled);
        sub.ends_at = Some(now().add_days(3));

        assert_eq!(policy.due_notification_day(&sub, now()), None);
    }

    #[test]
    fn validate_rejects_zero_grace() {
        assert!(GracePolicy::new(0, [1]).validate().is_err());
        assert!(GracePolicy::new(7, [0]).validate().is_err());
        assert!(GracePolicy::default().validate().is_ok());
    }

    #[test]
    fn max_notification_day_is_largest_trigger() {
        assert_eq!(GracePolicy::default().max_notification_day(), 7);
        assert_eq!(GracePolicy::new(7, []).max_notification_day(), 0);
    }
}
