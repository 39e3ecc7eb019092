//! Subscription status state machine.
//!
//! Defines every subscription state and the single edge table used by the
//! aggregate, the webhook pipeline and the grace scheduler.

use crate::domain::foundation::{DomainError, ErrorCode, StateMachine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Free trial running; access granted.
    Trialing,

    /// Paid and current.
    Active,

    /// Payment failed; access continues until the grace deadline.
    PastDue,

    /// Cancellation received. Expires once `ends_at` is reached.
    Canceled,

    /// Provider gave up retrying the payment.
    Unpaid,

    /// Created but the first payment has not completed.
    Incomplete,

    /// First payment never completed. Terminal.
    IncompleteExpired,

    /// Subscription ended. Terminal; resubscribing creates a new row.
    Expired,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 8] = [
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Incomplete,
        SubscriptionStatus::IncompleteExpired,
        SubscriptionStatus::Expired,
    ];

    /// Statuses counted by the one-current-subscription-per-tenant rule.
    pub const CURRENT: [SubscriptionStatus; 3] = [
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
    ];

    /// Statuses with a computable grace deadline the scheduler must enforce.
    pub const DEADLINE_BOUND: [SubscriptionStatus; 4] = [
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Unpaid,
    ];

    pub fn is_current(&self) -> bool {
        Self::CURRENT.contains(self)
    }

    pub fn is_deadline_bound(&self) -> bool {
        Self::DEADLINE_BOUND.contains(self)
    }

    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::InvalidFormat,
                    format!("Invalid subscription status: {}", s),
                )
            })
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From TRIALING
            (Trialing, Active)
                | (Trialing, Canceled)
                | (Trialing, Expired)
            // From ACTIVE
                | (Active, Active) // Renewal
                | (Active, PastDue)
                | (Active, Canceled)
            // From PAST_DUE
                | (PastDue, Active)
                | (PastDue, Unpaid)
                | (PastDue, Canceled)
                | (PastDue, Expired)
            // From UNPAID
                | (Unpaid, Active)
                | (Unpaid, Canceled)
                | (Unpaid, Expired)
            // From INCOMPLETE
                | (Incomplete, Active)
                | (Incomplete, IncompleteExpired)
            // From CANCELED
                | (Canceled, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Trialing => vec![Active, Canceled, Expired],
            Active => vec![Active, PastDue, Canceled],
            PastDue => vec![Active, Unpaid, Canceled, Expired],
            Unpaid => vec![Active, Canceled, Expired],
            Incomplete => vec![Active, IncompleteExpired],
            Canceled => vec![Expired],
            IncompleteExpired | Expired => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trialing_can_convert_to_active() {
        let result = SubscriptionStatus::Trialing.transition_to(SubscriptionStatus::Active);
        assert_eq!(result.unwrap(), SubscriptionStatus::Active);
    }

    #[test]
    fn trialing_cannot_go_past_due() {
        assert!(!SubscriptionStatus::Trialing.can_transition_to(&SubscriptionStatus::PastDue));
    }

    #[test]
    fn active_can_renew_to_active() {
        assert!(SubscriptionStatus::Active.can_transition_to(&SubscriptionStatus::Active));
    }

    #[test]
    fn active_cannot_expire_directly() {
        assert!(!SubscriptionStatus::Active.can_transition_to(&SubscriptionStatus::Expired));
    }

    #[test]
    fn past_due_can_recover_or_expire() {
        let status = SubscriptionStatus::PastDue;
        assert!(status.can_transition_to(&SubscriptionStatus::Active));
        assert!(status.can_transition_to(&SubscriptionStatus::Expired));
        assert!(status.can_transition_to(&SubscriptionStatus::Unpaid));
    }

    #[test]
    fn canceled_only_expires() {
        assert_eq!(
            SubscriptionStatus::Canceled.valid_transitions(),
            vec![SubscriptionStatus::Expired]
        );
    }

    #[test]
    fn expired_and_incomplete_expired_are_terminal() {
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(SubscriptionStatus::IncompleteExpired.is_terminal());
        assert!(!SubscriptionStatus::Canceled.is_terminal());
    }

    #[test]
    fn edge_table_matches_valid_transitions() {
        for from in SubscriptionStatus::ALL {
            for to in SubscriptionStatus::ALL {
                assert_eq!(
                    from.can_transition_to(&to),
                    from.valid_transitions().contains(&to),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in SubscriptionStatus::ALL {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&SubscriptionStatus::IncompleteExpired).unwrap();
        assert_eq!(json, "\"incomplete_expired\"");
    }

    #[test]
    fn current_and_deadline_bound_sets() {
        assert!(SubscriptionStatus::PastDue.is_current());
        assert!(!SubscriptionStatus::Canceled.is_current());
        assert!(SubscriptionStatus::Canceled.is_deadline_bound());
        assert!(!SubscriptionStatus::Active.is_deadline_bound());
    }
}
