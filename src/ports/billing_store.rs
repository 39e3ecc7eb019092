//! BillingStore port - transactional access to subscriptions and the
//! webhook dedup ledger.
//!
//! ## Why one transaction
//!
//! A webhook's dedup insert and its subscription mutation must commit or
//! roll back together. If they were separate, a crash between them would
//! either apply an event twice or mark it processed without applying it.
//!
//! Implementations must:
//! - make `claim_event` race-safe (a unique key on `external_event_id`)
//! - hold a row lock from `lock_subscription*` until commit/rollback
//! - roll back when a transaction is dropped without `commit`

use async_trait::async_trait;

use crate::domain::billing::{Subscription, SubscriptionEvent};
use crate::domain::foundation::{DomainError, SubscriptionId, TenantId, Timestamp};

/// Dedup ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedWebhookEvent {
    pub external_event_id: String,
    pub provider: String,
    pub event_type: String,
    pub processed_at: Timestamp,
}

impl ProcessedWebhookEvent {
    pub fn new(
        external_event_id: impl Into<String>,
        provider: impl Into<String>,
        event_type: impl Into<String>,
        processed_at: Timestamp,
    ) -> Self {
        Self {
            external_event_id: external_event_id.into(),
            provider: provider.into(),
            event_type: event_type.into(),
            processed_at,
        }
    }
}

/// Result of attempting to claim an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// First time this event id is seen; the caller owns it.
    Claimed,
    /// Already recorded by an earlier, committed delivery.
    AlreadyProcessed,
}

/// Entry point for billing writes.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError>;
}

/// One unit of work. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait BillingTransaction: Send {
    /// Inserts the dedup row unless the event id already exists.
    async fn claim_event(&mut self, event: &ProcessedWebhookEvent)
        -> Result<ClaimResult, DomainError>;

    /// Loads and row-locks a subscription by id.
    async fn lock_subscription(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Loads and row-locks a subscription by the provider's id.
    async fn lock_subscription_by_external_id(
        &mut self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// All subscriptions of a tenant, newest first, row-locked.
    async fn subscriptions_for_tenant(
        &mut self,
        tenant_id: TenantId,
    ) -> Result<Vec<Subscription>, DomainError>;

    async fn insert_subscription(&mut self, subscription: &Subscription)
        -> Result<(), DomainError>;

    async fn update_subscription(&mut self, subscription: &Subscription)
        -> Result<(), DomainError>;

    async fn append_event(&mut self, event: &SubscriptionEvent) -> Result<(), DomainError>;

    /// Deletes rows tagged with `migration_source` (and their audit events).
    ///
    /// Restricted to `tenant_id` when given. Returns subscriptions removed.
    async fn delete_migrated(
        &mut self,
        migration_source: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<u64, DomainError>;

    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}
