//! RetryFailedWebhooksHandler - drains due rows from the retry ledger.
//!
//! Stored payloads are re-parsed without a signature check; they were
//! verified when first received.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::{BillingError, FailedWebhookEvent, RetryPolicy};
use crate::domain::foundation::Timestamp;
use crate::ports::FailedWebhookRepository;

use super::ingest_webhook::{apply_with_timeout, record_failure, DEFAULT_WEBHOOK_TIMEOUT};
use super::{ProviderRegistry, WebhookApplier};

pub const DEFAULT_RETRY_BATCH_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct RetryFailedWebhooksCommand {
    pub now: Timestamp,
    pub batch_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryFailedWebhooksResult {
    pub attempted: u32,
    pub succeeded: u32,
    pub rescheduled: u32,
    /// Out of attempts or permanently failing.
    pub exhausted: u32,
    /// Ledger reads or writes that failed.
    pub errors: u32,
}

pub struct RetryFailedWebhooksHandler {
    registry: Arc<ProviderRegistry>,
    applier: Arc<WebhookApplier>,
    failures: Arc<dyn FailedWebhookRepository>,
    retry_policy: RetryPolicy,
    timeout: Duration,
}

enum RowOutcome {
    Succeeded,
    Rescheduled,
    Exhausted,
}

impl RetryFailedWebhooksHandler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        applier: Arc<WebhookApplier>,
        failures: Arc<dyn FailedWebhookRepository>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            applier,
            failures,
            retry_policy,
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// # Errors
    ///
    /// Only when the batch itself cannot be loaded. Per-row failures are
    /// counted.
    pub async fn handle(
        &self,
        cmd: RetryFailedWebhooksCommand,
    ) -> Result<RetryFailedWebhooksResult, BillingError> {
        let due = self.failures.due_for_retry(cmd.now, cmd.batch_size).await?;
        let mut result = RetryFailedWebhooksResult::default();

        for row in due {
            result.attempted += 1;
            let event_id = row.external_event_id.clone();
            match self.retry(row, cmd.now).await {
                Ok(RowOutcome::Succeeded) => result.succeeded += 1,
                Ok(RowOutcome::Rescheduled) => result.rescheduled += 1,
                Ok(RowOutcome::Exhausted) => result.exhausted += 1,
                Err(err) => {
                    tracing::error!(event_id = %event_id, error = %err, "Retry ledger update failed");
                    result.errors += 1;
                }
            }
        }

        if result.exhausted > 0 || result.errors > 0 {
            tracing::error!(
                attempted = result.attempted,
                succeeded = result.succeeded,
                rescheduled = result.rescheduled,
                exhausted = result.exhausted,
                errors = result.errors,
                "Webhook retry run finished with failures"
            );
        } else {
            tracing::info!(
                attempted = result.attempted,
                succeeded = result.succeeded,
                rescheduled = result.rescheduled,
                "Webhook retry run finished"
            );
        }
        Ok(result)
    }

    async fn retry(
        &self,
        row: FailedWebhookEvent,
        now: Timestamp,
    ) -> Result<RowOutcome, BillingError> {
        let outcome = match self.registry.get(&row.provider) {
            None => Err(BillingError::permanent(format!(
                "Provider '{}' is no longer registered",
                row.provider
            ))),
            Some(provider) => match provider.parse_event(&row.payload) {
                Err(err) => Err(BillingError::permanent(format!(
                    "Stored payload no longer parses: {}",
                    err
                ))),
                Ok(event) => {
                    apply_with_timeout(&self.applier, self.timeout, &row.provider, &event, now)
                        .await
                }
            },
        };

        match outcome {
            Ok(outcome) => {
                self.failures.mark_resolved(row.id, now).await?;
                tracing::info!(
                    event_id = %row.external_event_id,
                    attempts = row.attempts,
                    outcome = ?outcome,
                    "Failed webhook recovered"
                );
                Ok(RowOutcome::Succeeded)
            }
            Err(error) => {
                let record = record_failure(
                    self.failures.as_ref(),
                    &self.retry_policy,
                    &row.provider,
                    &row.external_event_id,
                    &row.payload,
                    &error,
                    now,
                )
                .await?;
                Ok(if record.next_retry_at.is_some() {
                    RowOutcome::Rescheduled
                } else {
                    RowOutcome::Exhausted
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::YamlPlanCatalog;
    use crate::adapters::memory::{InMemoryBillingStore, InMemoryFailedWebhookRepository};
    use crate::adapters::stripe::MockBillingProvider;
    use crate::application::handlers::billing::fixtures::{invoice_event, now, team_plan};
    use crate::domain::billing::{
        test_subscription, GracePolicy, ProviderEventType, SubscriptionStatus,
    };

    struct Harness {
        store: InMemoryBillingStore,
        failures: InMemoryFailedWebhookRepository,
        handler: RetryFailedWebhooksHandler,
    }

    fn harness() -> Harness {
        let store = InMemoryBillingStore::new();
        let failures = InMemoryFailedWebhookRepository::new();
        let catalog = YamlPlanCatalog::from_plans(vec![team_plan()]).unwrap();
        let registry = ProviderRegistry::new("mock").register(Arc::new(MockBillingProvider::new()));
        let applier = WebhookApplier::new(
            Arc::new(store.clone()),
            Arc::new(catalog),
            GracePolicy::default(),
        );
        let handler = RetryFailedWebhooksHandler::new(
            Arc::new(registry),
            Arc::new(applier),
            Arc::new(failures.clone()),
            RetryPolicy::default(),
        );
        Harness {
            store,
            failures,
            handler,
        }
    }

    async fn ledger_row(
        h: &Harness,
        provider: &str,
        event_id: &str,
        payload: Vec<u8>,
    ) -> FailedWebhookEvent {
        let earlier = now().plus_secs(-3600);
        let row = FailedWebhookEvent::record_transient(
            None,
            provider,
            event_id,
            &payload,
            "lock timeout",
            &RetryPolicy::default(),
            earlier,
        );
        h.failures.upsert(&row).await.unwrap();
        row
    }

    fn command() -> RetryFailedWebhooksCommand {
        RetryFailedWebhooksCommand {
            now: now(),
            batch_size: 10,
        }
    }

    #[tokio::test]
    async fn recovered_event_is_resolved() {
        let h = harness();
        let sub = test_subscription(SubscriptionStatus::Active);
        h.store.seed(sub.clone()).await;
        let event = invoice_event(
            "evt_1",
            ProviderEventType::PaymentFailed,
            sub.external_subscription_id.as_deref().unwrap(),
            1,
        );
        ledger_row(&h, "mock", "evt_1", MockBillingProvider::encode(&event)).await;

        let result = h.handler.handle(command()).await.unwrap();

        assert_eq!(result.attempted, 1);
        assert_eq!(result.succeeded, 1);
        assert!(h.failures.all().await[0].resolved_at.is_some());
        assert_eq!(h.store.subscriptions().await[0].status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn still_failing_event_is_rescheduled() {
        let h = harness();
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_missing", 1);
        ledger_row(&h, "mock", "evt_1", MockBillingProvider::encode(&event)).await;

        let result = h.handler.handle(command()).await.unwrap();

        assert_eq!(result.rescheduled, 1);
        let row = &h.failures.all().await[0];
        assert_eq!(row.attempts, 2);
        assert!(row.next_retry_at.unwrap() > now());
    }

    #[tokio::test]
    async fn unparseable_payload_is_exhausted_without_blocking_others() {
        let h = harness();
        ledger_row(&h, "mock", "evt_bad", b"garbage".to_vec()).await;
        let ok = invoice_event(
            "evt_ok",
            ProviderEventType::Unknown("ping".to_string()),
            "sub_x",
            1,
        );
        ledger_row(&h, "mock", "evt_ok", MockBillingProvider::encode(&ok)).await;

        let result = h.handler.handle(command()).await.unwrap();

        assert_eq!(result.attempted, 2);
        assert_eq!(result.exhausted, 1);
        assert_eq!(result.succeeded, 1);
    }

    #[tokio::test]
    async fn unregistered_provider_is_exhausted() {
        let h = harness();
        ledger_row(&h, "paddle", "evt_1", b"{}".to_vec()).await;

        let result = h.handler.handle(command()).await.unwrap();
        assert_eq!(result.exhausted, 1);
    }

    #[tokio::test]
    async fn ledger_write_failure_is_counted() {
        let h = harness();
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_missing", 1);
        ledger_row(&h, "mock", "evt_1", MockBillingProvider::encode(&event)).await;
        h.failures.set_fail_writes(true);

        let result = h.handler.handle(command()).await.unwrap();
        assert_eq!(result.errors, 1);
    }
}
