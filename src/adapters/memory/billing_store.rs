//! In-memory billing store for tests and local runs.
//!
//! Transactions are serialized by one `tokio::sync::Mutex`. Each transaction
//! works on a staged copy of the data that replaces the shared copy on
//! commit, so a dropped transaction leaves no trace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::billing::{Subscription, SubscriptionEvent, SubscriptionStatus};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, TenantId};
use crate::ports::{
    BillingStore, BillingTransaction, ClaimResult, ProcessedWebhookEvent, SubscriptionReader,
};

#[derive(Debug, Clone, Default)]
struct BillingData {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    /// Append order is audit order.
    events: Vec<SubscriptionEvent>,
    processed: HashMap<String, ProcessedWebhookEvent>,
}

impl BillingData {
    fn by_external_id(&self, external_subscription_id: &str) -> Option<&Subscription> {
        self.subscriptions
            .values()
            .find(|s| s.external_subscription_id.as_deref() == Some(external_subscription_id))
    }

    /// Tenant rows, newest first.
    fn tenant_rows(&self, tenant_id: TenantId) -> Vec<Subscription> {
        let mut rows: Vec<Subscription> = self
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }

    /// Mirrors the storage constraints: one current row per tenant and
    /// unique provider ids.
    fn check_constraints(&self, candidate: &Subscription) -> Result<(), DomainError> {
        for other in self.subscriptions.values().filter(|s| s.id != candidate.id) {
            if candidate.status.is_current()
                && other.status.is_current()
                && other.tenant_id == candidate.tenant_id
            {
                return Err(DomainError::new(
                    ErrorCode::ConstraintViolation,
                    format!(
                        "Tenant {} already has a current subscription",
                        candidate.tenant_id
                    ),
                ));
            }
            if candidate.external_subscription_id.is_some()
                && other.external_subscription_id == candidate.external_subscription_id
            {
                return Err(DomainError::new(
                    ErrorCode::ConstraintViolation,
                    "Duplicate external subscription id",
                ));
            }
        }
        Ok(())
    }
}

/// In-memory [`BillingStore`] that also serves [`SubscriptionReader`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryBillingStore {
    data: Arc<Mutex<BillingData>>,
    lock_failures: Arc<AtomicU32>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` row-lock attempts fail with a lock timeout.
    pub fn fail_next_locks(&self, count: u32) {
        self.lock_failures.store(count, Ordering::SeqCst);
    }

    /// Inserts a subscription outside any transaction.
    pub async fn seed(&self, subscription: Subscription) {
        self.data
            .lock()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let data = self.data.lock().await;
        let mut rows: Vec<Subscription> = data.subscriptions.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }

    pub async fn events(&self) -> Vec<SubscriptionEvent> {
        self.data.lock().await.events.clone()
    }

    pub async fn is_processed(&self, external_event_id: &str) -> bool {
        self.data
            .lock()
            .await
            .processed
            .contains_key(external_event_id)
    }

    pub async fn processed_count(&self) -> usize {
        self.data.lock().await.processed.len()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        let guard = Arc::clone(&self.data).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            staged,
            lock_failures: Arc::clone(&self.lock_failures),
        }))
    }
}

#[async_trait]
impl SubscriptionReader for InMemoryBillingStore {
    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.data.lock().await.subscriptions.get(&id).cloned())
    }

    async fn find_current_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<Subscription>, DomainError> {
        let rows = self.data.lock().await.tenant_rows(tenant_id);
        let current = rows.iter().find(|s| s.status.is_current()).cloned();
        Ok(current.or_else(|| rows.into_iter().next()))
    }

    async fn list_by_status(
        &self,
        statuses: &[SubscriptionStatus],
    ) -> Result<Vec<Subscription>, DomainError> {
        let data = self.data.lock().await;
        let mut rows: Vec<Subscription> = data
            .subscriptions
            .values()
            .filter(|s| statuses.contains(&s.status))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn events_for(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<SubscriptionEvent>, DomainError> {
        let data = self.data.lock().await;
        Ok(data
            .events
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect())
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<BillingData>,
    staged: BillingData,
    lock_failures: Arc<AtomicU32>,
}

impl InMemoryTransaction {
    fn check_lock(&self) -> Result<(), DomainError> {
        let injected = self
            .lock_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(DomainError::new(
                ErrorCode::LockTimeout,
                "canceling statement due to lock timeout",
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BillingTransaction for InMemoryTransaction {
    async fn claim_event(
        &mut self,
        event: &ProcessedWebhookEvent,
    ) -> Result<ClaimResult, DomainError> {
        if self.staged.processed.contains_key(&event.external_event_id) {
            return Ok(ClaimResult::AlreadyProcessed);
        }
        self.staged
            .processed
            .insert(event.external_event_id.clone(), event.clone());
        Ok(ClaimResult::Claimed)
    }

    async fn lock_subscription(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        self.check_lock()?;
        Ok(self.staged.subscriptions.get(&id).cloned())
    }

    async fn lock_subscription_by_external_id(
        &mut self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        self.check_lock()?;
        Ok(self.staged.by_external_id(external_subscription_id).cloned())
    }

    async fn subscriptions_for_tenant(
        &mut self,
        tenant_id: TenantId,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.check_lock()?;
        Ok(self.staged.tenant_rows(tenant_id))
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        if self.staged.subscriptions.contains_key(&subscription.id) {
            return Err(DomainError::new(
                ErrorCode::ConstraintViolation,
                format!("Subscription {} already exists", subscription.id),
            ));
        }
        self.staged.check_constraints(subscription)?;
        self.staged
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        if !self.staged.subscriptions.contains_key(&subscription.id) {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", subscription.id),
            ));
        }
        self.staged.check_constraints(subscription)?;
        self.staged
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn append_event(&mut self, event: &SubscriptionEvent) -> Result<(), DomainError> {
        self.staged.events.push(event.clone());
        Ok(())
    }

    async fn delete_migrated(
        &mut self,
        migration_source: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<u64, DomainError> {
        let doomed: Vec<SubscriptionId> = self
            .staged
            .subscriptions
            .values()
            .filter(|s| s.metadata.migration_source.as_deref() == Some(migration_source))
            .filter(|s| tenant_id.map_or(true, |t| s.tenant_id == t))
            .map(|s| s.id)
            .collect();

        for id in &doomed {
            self.staged.subscriptions.remove(id);
        }
        self.staged
            .events
            .retain(|e| !doomed.contains(&e.subscription_id));
        Ok(doomed.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let InMemoryTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{test_subscription, SubscriptionEventType};
    use crate::domain::foundation::Timestamp;

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000).unwrap()
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryBillingStore::new();
        let sub = test_subscription(SubscriptionStatus::Active);

        let mut tx = store.begin().await.unwrap();
        tx.insert_subscription(&sub).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.find_by_id(sub.id).await.unwrap(), Some(sub));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryBillingStore::new();
        let sub = test_subscription(SubscriptionStatus::Active);

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_subscription(&sub).await.unwrap();
            tx.claim_event(&ProcessedWebhookEvent::new("evt_1", "stripe", "x", now()))
                .await
                .unwrap();
        }

        assert!(store.find_by_id(sub.id).await.unwrap().is_none());
        assert!(!store.is_processed("evt_1").await);
    }

    #[tokio::test]
    async fn second_claim_reports_already_processed() {
        let store = InMemoryBillingStore::new();
        let row = ProcessedWebhookEvent::new("evt_1", "stripe", "payment_failed", now());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.claim_event(&row).await.unwrap(), ClaimResult::Claimed);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.claim_event(&row).await.unwrap(),
            ClaimResult::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn second_current_subscription_for_tenant_is_rejected() {
        let store = InMemoryBillingStore::new();
        let first = test_subscription(SubscriptionStatus::Active);
        let mut second = test_subscription(SubscriptionStatus::Trialing);
        second.tenant_id = first.tenant_id;
        second.external_subscription_id = Some("sub_other".to_string());
        store.seed(first).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_subscription(&second).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConstraintViolation);
    }

    #[tokio::test]
    async fn injected_lock_failure_is_a_lock_timeout() {
        let store = InMemoryBillingStore::new();
        store.fail_next_locks(1);

        let mut tx = store.begin().await.unwrap();
        let err = tx.lock_subscription(SubscriptionId::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LockTimeout);
        assert!(tx.lock_subscription(SubscriptionId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn current_lookup_falls_back_to_latest_row() {
        let store = InMemoryBillingStore::new();
        let mut expired = test_subscription(SubscriptionStatus::Expired);
        expired.created_at = now();
        store.seed(expired.clone()).await;

        let found = store
            .find_current_for_tenant(expired.tenant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn delete_migrated_removes_rows_and_their_events() {
        let store = InMemoryBillingStore::new();
        let mut migrated = test_subscription(SubscriptionStatus::Active);
        migrated.metadata.migration_source = Some("backfill".to_string());
        let organic = test_subscription(SubscriptionStatus::Active);

        let mut tx = store.begin().await.unwrap();
        tx.insert_subscription(&migrated).await.unwrap();
        tx.insert_subscription(&organic).await.unwrap();
        tx.append_event(&SubscriptionEvent::new(
            migrated.id,
            SubscriptionEventType::Created,
            "created",
            now(),
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_migrated("backfill", None).await.unwrap(), 1);
        tx.commit().await.unwrap();

        assert_eq!(store.subscriptions().await, vec![organic]);
        assert!(store.events().await.is_empty());
    }
}
