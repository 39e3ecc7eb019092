//! HTTP DTOs for the webhook endpoint.

use serde::{Deserialize, Serialize};

use crate::application::handlers::billing::{IngestWebhookResult, WebhookOutcome};

/// Body returned for every acknowledged delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub received: bool,
    /// `applied`, `ignored`, `duplicate`, `stale`, `acknowledged`,
    /// `retry_scheduled` or `failed`.
    pub outcome: String,
}

impl From<&IngestWebhookResult> for WebhookResponse {
    fn from(result: &IngestWebhookResult) -> Self {
        let outcome = match result {
            IngestWebhookResult::Processed(outcome) => match outcome {
                WebhookOutcome::Applied { .. } => "applied",
                WebhookOutcome::Ignored { .. } => "ignored",
                WebhookOutcome::Duplicate => "duplicate",
                WebhookOutcome::Stale { .. } => "stale",
                WebhookOutcome::Acknowledged => "acknowledged",
            },
            IngestWebhookResult::FailureRecorded {
                next_retry_at: Some(_),
                ..
            } => "retry_scheduled",
            IngestWebhookResult::FailureRecorded { .. } => "failed",
        };
        Self {
            received: true,
            outcome: outcome.to_string(),
        }
    }
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}
