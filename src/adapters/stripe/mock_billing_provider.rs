//! Mock billing provider for testing.
//!
//! Configurable implementation of `BillingProvider` for unit and integration
//! tests. Supports:
//! - Pre-configured customers and subscriptions
//! - Error injection
//! - Call tracking
//! - Webhook payloads as JSON-encoded `ProviderEvent`s

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::billing::{ProviderEvent, SubscriptionStatus};
use crate::ports::{
    BillingProvider, CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest,
    CreateSubscriptionRequest, Customer, PlanChange, PortalSession, ProviderError,
    ProviderSubscription,
};

const DEFAULT_PERIOD_SECS: i64 = 30 * 24 * 60 * 60;

/// Mock billing provider for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockBillingProvider::new();
/// mock.set_method_error("create_customer", ProviderError::network("down"));
///
/// let body = MockBillingProvider::encode(&event);
/// let parsed = mock.parse_event(&body)?;
/// ```
#[derive(Clone)]
pub struct MockBillingProvider {
    name: String,
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    customers: HashMap<String, Customer>,
    subscriptions: HashMap<String, ProviderSubscription>,

    /// Error to return on next call.
    next_error: Option<ProviderError>,

    /// Specific errors by method name.
    method_errors: HashMap<String, ProviderError>,

    call_log: Vec<MethodCall>,
    webhook_verify_mode: WebhookVerifyMode,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

#[derive(Default, Clone)]
enum WebhookVerifyMode {
    #[default]
    AcceptAll,

    /// Header must equal this value.
    RequireSignature(String),

    AlwaysFail,
}

impl Default for MockBillingProvider {
    fn default() -> Self {
        Self::named("mock")
    }
}

impl MockBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock registered under another provider name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a mock that fails all webhook verifications.
    pub fn rejecting_webhooks() -> Self {
        let mock = Self::new();
        mock.state().webhook_verify_mode = WebhookVerifyMode::AlwaysFail;
        mock
    }

    /// Create a mock that only accepts `signature` in the header.
    pub fn requiring_signature(signature: impl Into<String>) -> Self {
        let mock = Self::new();
        mock.state().webhook_verify_mode = WebhookVerifyMode::RequireSignature(signature.into());
        mock
    }

    /// Webhook body the mock understands.
    pub fn encode(event: &ProviderEvent) -> Vec<u8> {
        serde_json::to_vec(event).unwrap_or_default()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    pub fn add_customer(&self, customer: Customer) {
        self.state().customers.insert(customer.id.clone(), customer);
    }

    pub fn add_subscription(&self, subscription: ProviderSubscription) {
        self.state()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Set an error to return on the next call to any method.
    pub fn set_error(&self, error: ProviderError) {
        self.state().next_error = Some(error);
    }

    /// Set an error for a specific method.
    pub fn set_method_error(&self, method: &str, error: ProviderError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.method_errors.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.state().call_log.iter().any(|c| c.method == method)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_call(&self, method: &str, args: Vec<String>) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });

        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }
        if let Some(error) = state.next_error.take() {
            return Err(error);
        }
        Ok(())
    }

    fn short_id(prefix: &str) -> String {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_mock_{}", prefix, &uuid[..8])
    }

    fn update_existing(
        &self,
        subscription_id: &str,
        apply: impl FnOnce(&mut ProviderSubscription),
    ) -> Result<ProviderSubscription, ProviderError> {
        let mut state = self.state();
        let subscription = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| ProviderError::not_found("Subscription"))?;
        apply(subscription);
        Ok(subscription.clone())
    }
}

#[async_trait]
impl BillingProvider for MockBillingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature_header(&self) -> &'static str {
        "X-Mock-Signature"
    }

    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, ProviderError> {
        self.begin_call(
            "create_customer",
            vec![request.tenant_id.to_string(), request.email.clone()],
        )?;

        let customer = Customer {
            id: Self::short_id("cus"),
            email: request.email,
            name: request.name,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.add_customer(customer.clone());
        Ok(customer)
    }

    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>, ProviderError> {
        self.begin_call("get_customer", vec![customer_id.to_string()])?;
        Ok(self.state().customers.get(customer_id).cloned())
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.begin_call(
            "create_subscription",
            vec![request.customer_id.clone(), request.price_id.clone()],
        )?;

        let now = chrono::Utc::now().timestamp();
        let trial_end = request
            .trial_days
            .filter(|d| *d > 0)
            .map(|d| now + i64::from(d) * 24 * 60 * 60);
        let subscription = ProviderSubscription {
            id: Self::short_id("sub"),
            customer_id: request.customer_id,
            status: Some(if trial_end.is_some() {
                SubscriptionStatus::Trialing
            } else {
                SubscriptionStatus::Active
            }),
            price_id: Some(request.price_id),
            current_period_start: now,
            current_period_end: trial_end.unwrap_or(now + DEFAULT_PERIOD_SECS),
            cancel_at_period_end: false,
            trial_end,
        };
        self.add_subscription(subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, ProviderError> {
        self.begin_call("get_subscription", vec![subscription_id.to_string()])?;
        Ok(self.state().subscriptions.get(subscription_id).cloned())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.begin_call(
            "cancel_subscription",
            vec![subscription_id.to_string(), at_period_end.to_string()],
        )?;
        self.update_existing(subscription_id, |sub| {
            sub.cancel_at_period_end = at_period_end;
            if !at_period_end {
                sub.status = Some(SubscriptionStatus::Canceled);
            }
        })
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        change: PlanChange,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.begin_call(
            "update_subscription",
            vec![subscription_id.to_string(), change.price_id.clone()],
        )?;
        self.update_existing(subscription_id, |sub| sub.price_id = Some(change.price_id))
    }

    async fn resume_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.begin_call("resume_subscription", vec![subscription_id.to_string()])?;
        self.update_existing(subscription_id, |sub| sub.cancel_at_period_end = false)
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        self.begin_call(
            "create_checkout_session",
            vec![request.tenant_id.to_string(), request.price_id, request.email],
        )?;

        let id = Self::short_id("cs");
        Ok(CheckoutSession {
            url: format!("https://checkout.mock.test/{}", id),
            id,
            expires_at: chrono::Utc::now().timestamp() + 24 * 60 * 60,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, ProviderError> {
        self.begin_call(
            "create_portal_session",
            vec![customer_id.to_string(), return_url.to_string()],
        )?;

        let id = Self::short_id("bps");
        Ok(PortalSession {
            url: format!("https://portal.mock.test/{}", id),
            id,
        })
    }

    fn verify_webhook_signature(
        &self,
        _payload: &[u8],
        signature_header: &str,
    ) -> Result<(), ProviderError> {
        self.begin_call("verify_webhook_signature", vec![signature_header.to_string()])?;

        match &self.state().webhook_verify_mode {
            WebhookVerifyMode::AcceptAll => Ok(()),
            WebhookVerifyMode::RequireSignature(required) if signature_header == required => Ok(()),
            WebhookVerifyMode::RequireSignature(_) => {
                Err(ProviderError::invalid_signature("Invalid signature"))
            }
            WebhookVerifyMode::AlwaysFail => {
                Err(ProviderError::invalid_signature("Verification disabled"))
            }
        }
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProviderEvent, ProviderError> {
        self.begin_call("parse_event", vec![])?;
        serde_json::from_slice(payload)
            .map_err(|e| ProviderError::invalid_payload(format!("Invalid JSON: {}", e)))
    }
}
