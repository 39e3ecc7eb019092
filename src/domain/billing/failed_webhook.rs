//! Failed webhook ledger entries and retry backoff.

use crate::domain::foundation::{FailedWebhookId, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Exponential backoff for transient webhook failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::seconds(60),
            max_delay: Duration::hours(6),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempts` (1-based): `base * 2^(attempts-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(30);
        let factor = 1i32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Next attempt time, or `None` once `attempts` reaches the cap.
    pub fn next_retry_at(&self, attempts: u32, now: Timestamp) -> Option<Timestamp> {
        if attempts >= self.max_attempts {
            None
        } else {
            Some(now.plus(self.delay_for(attempts)))
        }
    }
}

/// A webhook that could not be applied.
///
/// `next_retry_at == None` marks a permanent failure, either classified as
/// such or out of attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedWebhookEvent {
    pub id: FailedWebhookId,
    pub provider: String,
    pub external_event_id: String,
    /// Raw body as received.
    pub payload: Vec<u8>,
    pub error: String,
    pub attempts: u32,
    pub next_retry_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl FailedWebhookEvent {
    fn blank(provider: &str, external_event_id: &str, payload: &[u8], now: Timestamp) -> Self {
        Self {
            id: FailedWebhookId::new(),
            provider: provider.to_string(),
            external_event_id: external_event_id.to_string(),
            payload: payload.to_vec(),
            error: String::new(),
            attempts: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// Records one more transient failure, scheduling the next attempt.
    pub fn record_transient(
        existing: Option<Self>,
        provider: &str,
        external_event_id: &str,
        payload: &[u8],
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: Timestamp,
    ) -> Self {
        let mut record =
            existing.unwrap_or_else(|| Self::blank(provider, external_event_id, payload, now));
        record.attempts = record.attempts.saturating_add(1).min(policy.max_attempts);
        record.next_retry_at = policy.next_retry_at(record.attempts, now);
        record.error = error.into();
        record.updated_at = now;
        record.resolved_at = None;
        record
    }

    /// Records a failure that retrying cannot fix.
    pub fn record_permanent(
        existing: Option<Self>,
        provider: &str,
        external_event_id: &str,
        payload: &[u8],
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: Timestamp,
    ) -> Self {
        let mut record =
            existing.unwrap_or_else(|| Self::blank(provider, external_event_id, payload, now));
        record.attempts = policy.max_attempts;
        record.next_retry_at = None;
        record.error = error.into();
        record.updated_at = now;
        record.resolved_at = None;
        record
    }

    pub fn is_permanent(&self) -> bool {
        self.next_retry_at.is_none() && self.resolved_at.is_none()
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.resolved_at.is_none()
            && self.next_retry_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn mark_resolved(&mut self, now: Timestamp) {
        self.resolved_at = Some(now);
        self.next_retry_at = None;
        self.updated_at = now;
    }
}
