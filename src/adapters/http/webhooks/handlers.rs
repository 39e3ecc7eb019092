//! HTTP handler for provider webhooks.
//!
//! Status codes tell the provider whether to redeliver. Anything already in
//! the retry ledger is acknowledged with 200; the retry worker owns it from
//! there.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::application::handlers::billing::{
    IngestWebhookCommand, IngestWebhookHandler, ProviderRegistry,
};
use crate::domain::billing::BillingError;
use crate::domain::foundation::Timestamp;

use super::dto::{ErrorResponse, WebhookResponse};

/// Shared state for webhook routes.
#[derive(Clone)]
pub struct WebhookAppState {
    pub registry: Arc<ProviderRegistry>,
    pub ingest: Arc<IngestWebhookHandler>,
}

impl WebhookAppState {
    pub fn new(registry: Arc<ProviderRegistry>, ingest: Arc<IngestWebhookHandler>) -> Self {
        Self { registry, ingest }
    }
}

/// POST /webhooks/:provider
pub async fn receive_webhook(
    State(state): State<WebhookAppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let header_name = state.registry.resolve(&provider)?.signature_header();
    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let result = state
        .ingest
        .handle(IngestWebhookCommand {
            provider,
            payload: body.to_vec(),
            signature,
            now: Timestamp::now(),
        })
        .await?;

    Ok((StatusCode::OK, Json(WebhookResponse::from(&result))))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// Converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct WebhookApiError(BillingError);

impl From<BillingError> for WebhookApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl WebhookApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            BillingError::Configuration(_) => StatusCode::NOT_FOUND,
            BillingError::Authentication(_) => StatusCode::UNAUTHORIZED,
            BillingError::Validation(_) => StatusCode::BAD_REQUEST,
            // Only reached when the retry ledger could not be written.
            BillingError::TransientProcessing(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::PermanentProcessing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        // Signature failures get no detail.
        let message = match &self.0 {
            BillingError::Authentication(_) => "Invalid webhook signature",
            other => other.message(),
        };
        let body = ErrorResponse::new(self.0.code(), message);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes_map_to_redelivery_semantics() {
        let cases = [
            (BillingError::configuration("unknown provider"), StatusCode::NOT_FOUND),
            (BillingError::authentication("bad"), StatusCode::UNAUTHORIZED),
            (BillingError::validation("bad json"), StatusCode::BAD_REQUEST),
            (BillingError::transient("db down"), StatusCode::SERVICE_UNAVAILABLE),
            (BillingError::permanent("ledger down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(WebhookApiError::from(err).status(), expected);
        }
    }
}
