//! Billing provider port - gateway to the external payment service.
//!
//! Defines the contract for payment gateway integrations (e.g., Stripe).
//! Provider-specific failures are translated into [`ProviderError`] inside
//! the adapter and into [`BillingError`] at this boundary.
//!
//! # Design
//!
//! - **Gateway agnostic**: the pipeline only sees [`ProviderEvent`]
//! - **Verify and parse are separate**: the retry worker re-parses stored
//!   payloads without re-checking a signature that was valid on receipt

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::{BillingError, ProviderEvent, SubscriptionStatus};
use crate::domain::foundation::TenantId;

/// Port for billing provider integrations.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Registry key, e.g. `stripe`.
    fn name(&self) -> &str;

    /// HTTP header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;

    /// Create a customer in the provider.
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, ProviderError>;

    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>, ProviderError>;

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError>;

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, ProviderError>;

    /// Cancel a subscription.
    ///
    /// If `at_period_end` is true the subscription stays current until the
    /// period ends.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProviderSubscription, ProviderError>;

    /// Move a subscription to another price.
    async fn update_subscription(
        &self,
        subscription_id: &str,
        change: PlanChange,
    ) -> Result<ProviderSubscription, ProviderError>;

    /// Withdraw a scheduled cancellation.
    async fn resume_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError>;

    /// Hosted checkout for a first subscription.
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError>;

    /// Hosted self-service portal.
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, ProviderError>;

    /// Checks `signature_header` against the raw body.
    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), ProviderError>;

    /// Parses a raw body into the provider-neutral event.
    fn parse_event(&self, payload: &[u8]) -> Result<ProviderEvent, ProviderError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    /// Stored as provider metadata so webhooks can name the tenant.
    pub tenant_id: TenantId,
    pub email: String,
    pub name: Option<String>,
    /// Idempotency key for safe retries.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    /// Provider timestamp, unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_id: String,
    pub tenant_id: TenantId,
    pub price_id: String,
    pub trial_days: Option<u32>,
    pub idempotency_key: Option<String>,
}

/// Subscription as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    /// `None` for provider statuses we do not model (e.g. paused).
    pub status: Option<SubscriptionStatus>,
    pub price_id: Option<String>,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<i64>,
}

/// Target of a plan change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanChange {
    pub price_id: String,
    /// Charge or credit the difference immediately.
    #[serde(default)]
    pub prorate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCheckoutRequest {
    pub tenant_id: TenantId,
    pub email: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub trial_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// Errors from provider operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
    /// Provider's own error code, if any.
    pub provider_code: Option<String>,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Network, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimit, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Authentication, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(ProviderErrorCode::NotFound, format!("{} not found", resource))
    }

    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidSignature, message)
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidPayload, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Api, message)
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for BillingError {
    fn from(err: ProviderError) -> Self {
        match err.code {
            ProviderErrorCode::InvalidSignature => BillingError::Authentication(err.message),
            ProviderErrorCode::InvalidPayload => BillingError::Validation(err.message),
            ProviderErrorCode::Network | ProviderErrorCode::RateLimit => {
                BillingError::TransientProcessing(err.to_string())
            }
            _ => BillingError::PermanentProcessing(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
    Network,
    RateLimit,
    /// API credentials rejected.
    Authentication,
    NotFound,
    InvalidSignature,
    InvalidPayload,
    /// Any other provider-side rejection.
    Api,
}

impl ProviderErrorCode {
    /// Check if this error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderErrorCode::Network | ProviderErrorCode::RateLimit)
    }
}

impl std::fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorCode::Network => "network_error",
            ProviderErrorCode::RateLimit => "rate_limit_exceeded",
            ProviderErrorCode::Authentication => "authentication_error",
            ProviderErrorCode::NotFound => "not_found",
            ProviderErrorCode::InvalidSignature => "invalid_signature",
            ProviderErrorCode::InvalidPayload => "invalid_payload",
            ProviderErrorCode::Api => "provider_error",
        };
        write!(f, "{}", s)
    }
}
