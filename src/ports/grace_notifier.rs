//! GraceNotifier port - grace-period reminders.
//!
//! A reminder day is only recorded against the subscription when delivery
//! is `Confirmed`. Anything else is retried on the next scheduler run.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::billing::SubscriptionStatus;
use crate::domain::foundation::{SubscriptionId, TenantId, Timestamp};

/// One reminder to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraceNotice {
    pub tenant_id: TenantId,
    pub subscription_id: SubscriptionId,
    pub status: SubscriptionStatus,
    /// Trigger day (days left before the deadline).
    pub day: u32,
    pub grace_deadline: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the delivery channel.
    Confirmed,
    /// Handed off without an acknowledgement.
    Unconfirmed,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No recipient for tenant {0}")]
    NoRecipient(TenantId),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait GraceNotifier: Send + Sync {
    async fn notify(&self, notice: &GraceNotice) -> Result<Delivery, NotifyError>;
}
