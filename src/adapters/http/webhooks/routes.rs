//! Axum router for provider webhooks.

use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{receive_webhook, WebhookAppState};

/// Webhook router.
///
/// # Routes
/// - `POST /webhooks/:provider` - Signature-verified provider events
pub fn webhook_router(state: WebhookAppState) -> Router {
    Router::new()
        .route("/webhooks/:provider", post(receive_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::YamlPlanCatalog;
    use crate::adapters::memory::{InMemoryBillingStore, InMemoryFailedWebhookRepository};
    use crate::adapters::http::webhooks::WebhookResponse;
    use crate::adapters::stripe::MockBillingProvider;
    use crate::application::handlers::billing::fixtures::{invoice_event, team_plan};
    use crate::application::handlers::billing::{
        IngestWebhookHandler, ProviderRegistry, WebhookApplier,
    };
    use crate::domain::billing::{
        test_subscription, GracePolicy, ProviderEventType, RetryPolicy, SubscriptionStatus,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    // ───────────────────────────────────────────────────────────────
    // Test Helpers
    // ───────────────────────────────────────────────────────────────

    struct Harness {
        store: InMemoryBillingStore,
        failures: InMemoryFailedWebhookRepository,
        router: Router,
    }

    fn harness(provider: MockBillingProvider) -> Harness {
        let store = InMemoryBillingStore::new();
        let failures = InMemoryFailedWebhookRepository::new();
        let catalog = YamlPlanCatalog::from_plans(vec![team_plan()]).unwrap();
        let registry = Arc::new(ProviderRegistry::new("mock").register(Arc::new(provider)));
        let applier = Arc::new(WebhookApplier::new(
            Arc::new(store.clone()),
            Arc::new(catalog),
            GracePolicy::default(),
        ));
        let ingest = Arc::new(IngestWebhookHandler::new(
            registry.clone(),
            applier,
            Arc::new(failures.clone()),
            RetryPolicy::default(),
        ));
        Harness {
            store,
            failures,
            router: webhook_router(WebhookAppState::new(registry, ingest)),
        }
    }

    fn payment_failed(event_id: &str, external_subscription_id: &str) -> Vec<u8> {
        MockBillingProvider::encode(&invoice_event(
            event_id,
            ProviderEventType::PaymentFailed,
            external_subscription_id,
            1,
        ))
    }

    fn post(path: &str, body: Vec<u8>, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(path);
        if let Some(sig) = signature {
            builder = builder.header("X-Mock-Signature", sig);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn outcome(response: axum::response::Response) -> WebhookResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ───────────────────────────────────────────────────────────────
    // Tests
    // ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn applied_event_returns_ok() {
        let h = harness(MockBillingProvider::new());
        let sub = test_subscription(SubscriptionStatus::Active);
        h.store.seed(sub.clone()).await;
        let body = payment_failed("evt_1", sub.external_subscription_id.as_deref().unwrap());

        let response = h
            .router
            .oneshot(post("/webhooks/mock", body, Some("sig")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(outcome(response).await.outcome, "applied");
        assert_eq!(h.store.subscriptions().await[0].status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let h = harness(MockBillingProvider::new());

        let response = h
            .router
            .oneshot(post("/webhooks/paddle", b"{}".to_vec(), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let h = harness(MockBillingProvider::requiring_signature("good"));

        let response = h
            .router
            .oneshot(post("/webhooks/mock", payment_failed("evt_1", "sub_1"), Some("bad")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.store.processed_count().await, 0);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let h = harness(MockBillingProvider::new());

        let response = h
            .router
            .oneshot(post("/webhooks/mock", b"not json".to_vec(), Some("sig")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recorded_transient_failure_is_acknowledged() {
        let h = harness(MockBillingProvider::new());

        // Unknown subscription: transient, lands in the retry ledger.
        let response = h
            .router
            .oneshot(post("/webhooks/mock", payment_failed("evt_1", "sub_missing"), Some("sig")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(outcome(response).await.outcome, "retry_scheduled");
        assert_eq!(h.failures.all().await.len(), 1);
    }

    #[tokio::test]
    async fn unrecorded_transient_failure_is_unavailable() {
        let h = harness(MockBillingProvider::new());
        h.failures.set_fail_writes(true);

        let response = h
            .router
            .oneshot(post("/webhooks/mock", payment_failed("evt_1", "sub_missing"), Some("sig")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
