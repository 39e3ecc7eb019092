//! IngestWebhookHandler - entry point for provider webhook deliveries.
//!
//! Resolve provider, verify signature, parse, then apply. Nothing is
//! persisted before parsing succeeds. Processing failures after that land in
//! the retry ledger.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::{BillingError, FailedWebhookEvent, ProviderEvent, RetryPolicy};
use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::FailedWebhookRepository;

use super::{ProviderRegistry, WebhookApplier, WebhookOutcome};

/// Default bound on one webhook's transaction.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Command to ingest one webhook delivery.
#[derive(Debug, Clone)]
pub struct IngestWebhookCommand {
    /// Provider name taken from the route.
    pub provider: String,
    /// Raw request body.
    pub payload: Vec<u8>,
    /// Value of the provider's signature header, if present.
    pub signature: Option<String>,
    pub now: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestWebhookResult {
    Processed(WebhookOutcome),
    /// Processing failed and the failure is in the retry ledger.
    FailureRecorded {
        external_event_id: String,
        error: BillingError,
        attempts: u32,
        next_retry_at: Option<Timestamp>,
    },
}

pub struct IngestWebhookHandler {
    registry: Arc<ProviderRegistry>,
    applier: Arc<WebhookApplier>,
    failures: Arc<dyn FailedWebhookRepository>,
    retry_policy: RetryPolicy,
    timeout: Duration,
}

impl IngestWebhookHandler {
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
    /// - `Configuration`, `Authentication`, `Validation` before anything is
    ///   persisted
    /// - the processing error itself if it could not be written to the
    ///   retry ledger
    pub async fn handle(
        &self,
        cmd: IngestWebhookCommand,
    ) -> Result<IngestWebhookResult, BillingError> {
        let provider = self.registry.resolve(&cmd.provider)?;

        let signature = cmd.signature.as_deref().unwrap_or_default();
        if let Err(err) = provider.verify_webhook_signature(&cmd.payload, signature) {
            tracing::warn!(
                security_event = true,
                provider = provider.name(),
                error = %err,
                "Webhook signature rejected"
            );
            return Err(err.into());
        }

        let event = provider.parse_event(&cmd.payload).map_err(|err| {
            tracing::warn!(provider = provider.name(), error = %err, "Malformed webhook payload");
            BillingError::from(err)
        })?;

        tracing::debug!(
            provider = provider.name(),
            event_id = %event.external_event_id,
            event_type = event.event_type.as_str(),
            "Webhook verified"
        );

        match apply_with_timeout(&self.applier, self.timeout, provider.name(), &event, cmd.now)
            .await
        {
            Ok(outcome) => Ok(IngestWebhookResult::Processed(outcome)),
            Err(error) => {
                let record = record_failure(
                    self.failures.as_ref(),
                    &self.retry_policy,
                    provider.name(),
                    &event.external_event_id,
                    &cmd.payload,
                    &error,
                    cmd.now,
                )
                .await
                .map_err(|ledger_err| {
                    tracing::error!(
                        alert = true,
                        event_id = %event.external_event_id,
                        error = %error,
                        ledger_error = %ledger_err,
                        "Could not record webhook failure"
                    );
                    error.clone()
                })?;

                Ok(IngestWebhookResult::FailureRecorded {
                    external_event_id: event.external_event_id,
                    error,
                    attempts: record.attempts,
                    next_retry_at: record.next_retry_at,
                })
            }
        }
    }
}

/// Runs the applier under `timeout`. An elapsed timeout drops the
/// transaction and counts as transient.
pub(super) async fn apply_with_timeout(
    applier: &WebhookApplier,
    timeout: Duration,
    provider: &str,
    event: &ProviderEvent,
    now: Timestamp,
) -> Result<WebhookOutcome, BillingError> {
    match tokio::time::timeout(timeout, applier.apply(provider, event, now)).await {
        Ok(result) => result,
        Err(_) => Err(BillingError::transient(format!(
            "Processing timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Upserts the ledger row for a failed event.
pub(super) async fn record_failure(
    failures: &dyn FailedWebhookRepository,
    policy: &RetryPolicy,
    provider: &str,
    external_event_id: &str,
    payload: &[u8],
    error: &BillingError,
    now: Timestamp,
) -> Result<FailedWebhookEvent, DomainError> {
    let existing = failures.find_by_external_id(external_event_id).await?;
    let record = if error.is_retryable() {
        FailedWebhookEvent::record_transient(
            existing,
            provider,
            external_event_id,
            payload,
            error.to_string(),
            policy,
            now,
        )
    } else {
        FailedWebhookEvent::record_permanent(
            existing,
            provider,
            external_event_id,
            payload,
            error.to_string(),
            policy,
            now,
        )
    };
    failures.upsert(&record).await?;

    match record.next_retry_at {
        Some(next) => tracing::debug!(
            event_id = external_event_id,
            attempts = record.attempts,
            next_retry_at = %next,
            error = %error,
            "Webhook failure scheduled for retry"
        ),
        None => tracing::error!(
            alert = true,
            event_id = external_event_id,
            provider,
            attempts = record.attempts,
            error = %error,
            "Webhook failed permanently"
        ),
    }
    Ok(record)
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
        handler: IngestWebhookHandler,
    }

    fn harness_with(provider: MockBillingProvider) -> Harness {
        let store = InMemoryBillingStore::new();
        let failures = InMemoryFailedWebhookRepository::new();
        let catalog = YamlPlanCatalog::from_plans(vec![team_plan()]).unwrap();
        let registry = ProviderRegistry::new("mock").register(Arc::new(provider));
        let applier = WebhookApplier::new(
            Arc::new(store.clone()),
            Arc::new(catalog),
            GracePolicy::default(),
        );
        let handler = IngestWebhookHandler::new(
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

    fn harness() -> Harness {
        harness_with(MockBillingProvider::new())
    }

    fn command(provider: &str, event: &ProviderEvent) -> IngestWebhookCommand {
        IngestWebhookCommand {
            provider: provider.to_string(),
            payload: MockBillingProvider::encode(event),
            signature: Some("sig".to_string()),
            now: now(),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Rejection Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unknown_provider_is_configuration_error() {
        let h = harness();
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_1", 1);

        let err = h.handler.handle(command("paddle", &event)).await.unwrap_err();

        assert!(matches!(err, BillingError::Configuration(_)));
        assert_eq!(h.store.processed_count().await, 0);
    }

    #[tokio::test]
    async fn bad_signature_persists_nothing() {
        let h = harness_with(MockBillingProvider::rejecting_webhooks());
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_1", 1);

        let err = h.handler.handle(command("mock", &event)).await.unwrap_err();

        assert!(matches!(err, BillingError::Authentication(_)));
        assert_eq!(h.store.processed_count().await, 0);
        assert!(h.failures.all().await.is_empty());
    }

    #[tokio::test]
    async fn missing_signature_header_fails_strict_provider() {
        let h = harness_with(MockBillingProvider::requiring_signature("sig"));
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_1", 1);
        let mut cmd = command("mock", &event);
        cmd.signature = None;

        let err = h.handler.handle(cmd).await.unwrap_err();
        assert!(matches!(err, BillingError::Authentication(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_validation_error() {
        let h = harness();
        let cmd = IngestWebhookCommand {
            provider: "mock".to_string(),
            payload: b"{not json".to_vec(),
            signature: Some("sig".to_string()),
            now: now(),
        };

        let err = h.handler.handle(cmd).await.unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
        assert!(h.failures.all().await.is_empty());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Processing Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn valid_webhook_is_applied() {
        let h = harness();
        let sub = test_subscription(SubscriptionStatus::Active);
        h.store.seed(sub.clone()).await;
        let event = invoice_event(
            "evt_1",
            ProviderEventType::PaymentFailed,
            sub.external_subscription_id.as_deref().unwrap(),
            1,
        );

        let result = h.handler.handle(command("mock", &event)).await.unwrap();

        assert!(matches!(
            result,
            IngestWebhookResult::Processed(WebhookOutcome::Applied { .. })
        ));
    }

    #[tokio::test]
    async fn lock_timeout_is_recorded_for_retry() {
        let h = harness();
        let sub = test_subscription(SubscriptionStatus::Active);
        h.store.seed(sub.clone()).await;
        h.store.fail_next_locks(1);
        let event = invoice_event(
            "evt_1",
            ProviderEventType::PaymentFailed,
            sub.external_subscription_id.as_deref().unwrap(),
            1,
        );

        let result = h.handler.handle(command("mock", &event)).await.unwrap();

        match result {
            IngestWebhookResult::FailureRecorded {
                attempts,
                next_retry_at,
                error,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(next_retry_at.unwrap() > now());
                assert!(error.is_retryable());
            }
            other => panic!("expected failure record, got {:?}", other),
        }
        assert!(!h.store.is_processed("evt_1").await);
    }

    #[tokio::test]
    async fn repeated_transient_failures_exhaust_attempts() {
        let h = harness();
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_missing", 1);

        for _ in 0..RetryPolicy::default().max_attempts {
            h.handler.handle(command("mock", &event)).await.unwrap();
        }

        let rows = h.failures.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempts, 5);
        assert_eq!(rows[0].next_retry_at, None);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_scheduled() {
        let h = harness();
        let mut snap = crate::application::handlers::billing::fixtures::snapshot("sub_new");
        snap.price_id = Some("price_unknown".to_string());
        let event = crate::application::handlers::billing::fixtures::subscription_event(
            "evt_1",
            ProviderEventType::SubscriptionCreated,
            snap,
            1,
        );

        let result = h.handler.handle(command("mock", &event)).await.unwrap();

        assert!(matches!(
            result,
            IngestWebhookResult::FailureRecorded {
                next_retry_at: None,
                attempts: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn ledger_failure_surfaces_original_error() {
        let h = harness();
        h.failures.set_fail_writes(true);
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_missing", 1);

        let err = h.handler.handle(command("mock", &event)).await.unwrap_err();
        assert!(matches!(err, BillingError::TransientProcessing(_)));
    }
}
