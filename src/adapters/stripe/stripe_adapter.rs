//! Stripe billing provider adapter.
//!
//! Implements the `BillingProvider` port against the Stripe REST API.
//!
//! # Security
//!
//! - HMAC-SHA256 signature verification with constant-time comparison
//! - Timestamp validation (5-minute window) for replay attack prevention
//! - Secrets handled via `secrecy::SecretString`
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key, webhook_secret);
//! let adapter = StripeBillingProvider::new(config);
//! ```

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::billing::ProviderEvent;
use crate::ports::{
    BillingProvider, CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest,
    CreateSubscriptionRequest, Customer, PlanChange, PortalSession, ProviderError,
    ProviderSubscription,
};

use super::webhook_types::{
    map_subscription_status, SignatureHeader, StripeCheckoutSession, StripeCustomer,
    StripeErrorBody, StripeSubscription, StripeWebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Registry name of this provider.
pub const STRIPE_PROVIDER: &str = "stripe";

/// Maximum age for webhook events (5 minutes).
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    api_base_url: String,

    /// Reject test-mode events.
    require_livemode: bool,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            webhook_secret: SecretString::new(webhook_secret.into()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            require_livemode: false,
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }
}

/// Stripe billing provider.
pub struct StripeBillingProvider {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeBillingProvider {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
    }

    /// Sends a request and decodes a successful JSON body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ProviderError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_response(status, &body);
            tracing::error!(
                status = status.as_u16(),
                code = %err.code,
                provider_code = ?err.provider_code,
                "Stripe API request failed"
            );
            return Err(err);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::api(format!("Failed to parse Stripe response: {}", e)))
    }

    /// Like [`send`](Self::send) but maps 404 to `None`.
    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ProviderError> {
        match self.send(request).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.code == crate::ports::ProviderErrorCode::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Verify a webhook signature against `now_secs`.
    ///
    /// # Security
    ///
    /// - Uses constant-time comparison to prevent timing attacks
    /// - Validates timestamp to prevent replay attacks
    fn verify_signature_at(
        &self,
        payload: &[u8],
        header: &SignatureHeader,
        now_secs: i64,
    ) -> Result<(), ProviderError> {
        let age = now_secs - header.timestamp;

        if age > MAX_TIMESTAMP_AGE_SECS {
            return Err(ProviderError::invalid_signature(format!(
                "Event too old ({} seconds)",
                age
            )));
        }

        if age < -MAX_FUTURE_TOLERANCE_SECS {
            return Err(ProviderError::invalid_signature("Event timestamp in future"));
        }

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.expose_secret().as_bytes())
            .map_err(|_| ProviderError::api("Webhook secret cannot key HMAC"))?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        let matched = header
            .v1_signatures
            .iter()
            .any(|provided| expected.as_slice().ct_eq(provided).unwrap_u8() == 1);
        if !matched {
            return Err(ProviderError::invalid_signature("Invalid signature"));
        }

        Ok(())
    }

    fn to_provider_subscription(sub: StripeSubscription) -> ProviderSubscription {
        ProviderSubscription {
            status: map_subscription_status(&sub.status),
            price_id: sub.price_id().map(String::from),
            current_period_start: sub.current_period_start.unwrap_or_default(),
            current_period_end: sub.current_period_end.unwrap_or_default(),
            cancel_at_period_end: sub.cancel_at_period_end,
            trial_end: sub.trial_end,
            id: sub.id,
            customer_id: sub.customer,
        }
    }
}

/// Maps a failed Stripe response onto the provider error taxonomy.
fn classify_response(status: StatusCode, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<StripeErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.error.message.clone())
        .unwrap_or_else(|| format!("Stripe API error ({})", status));

    let err = match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::authentication(message),
        StatusCode::NOT_FOUND => ProviderError::not_found("Stripe resource"),
        s if s.is_server_error() => ProviderError::network(message),
        _ => ProviderError::api(message),
    };

    match parsed.and_then(|b| b.error.code.or(b.error.error_type)) {
        Some(code) => err.with_provider_code(code),
        None => err,
    }
}

#[async_trait]
impl BillingProvider for StripeBillingProvider {
    fn name(&self) -> &str {
        STRIPE_PROVIDER
    }

    fn signature_header(&self) -> &'static str {
        "Stripe-Signature"
    }

    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, ProviderError> {
        let mut params = vec![
            ("email", request.email.clone()),
            ("metadata[tenant_id]", request.tenant_id.to_string()),
        ];
        if let Some(name) = &request.name {
            params.push(("name", name.clone()));
        }

        let mut http = self.http_client.post(self.url("customers")).form(&params);
        if let Some(key) = &request.idempotency_key {
            http = http.header("Idempotency-Key", key);
        }
        let customer: StripeCustomer = self.send(http).await?;

        Ok(Customer {
            id: customer.id,
            email: customer.email.unwrap_or(request.email),
            name: customer.name.or(request.name),
            created_at: customer.created,
        })
    }

    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>, ProviderError> {
        let http = self
            .http_client
            .get(self.url(&format!("customers/{}", customer_id)));
        let customer: Option<StripeCustomer> = self.send_optional(http).await?;

        Ok(customer.filter(|c| !c.deleted).map(|c| Customer {
            id: c.id,
            email: c.email.unwrap_or_default(),
            name: c.name,
            created_at: c.created,
        }))
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        let mut params = vec![
            ("customer", request.customer_id.clone()),
            ("items[0][price]", request.price_id.clone()),
            ("metadata[tenant_id]", request.tenant_id.to_string()),
        ];
        if let Some(days) = request.trial_days.filter(|d| *d > 0) {
            params.push(("trial_period_days", days.to_string()));
        }

        let mut http = self
            .http_client
            .post(self.url("subscriptions"))
            .form(&params);
        if let Some(key) = &request.idempotency_key {
            http = http.header("Idempotency-Key", key);
        }
        let sub: StripeSubscription = self.send(http).await?;
        Ok(Self::to_provider_subscription(sub))
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, ProviderError> {
        let http = self
            .http_client
            .get(self.url(&format!("subscriptions/{}", subscription_id)));
        let sub: Option<StripeSubscription> = self.send_optional(http).await?;
        Ok(sub.map(Self::to_provider_subscription))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProviderSubscription, ProviderError> {
        let url = self.url(&format!("subscriptions/{}", subscription_id));
        let http = if at_period_end {
            self.http_client
                .post(url)
                .form(&[("cancel_at_period_end", "true")])
        } else {
            self.http_client.delete(url)
        };
        let sub: StripeSubscription = self.send(http).await?;
        Ok(Self::to_provider_subscription(sub))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        change: PlanChange,
    ) -> Result<ProviderSubscription, ProviderError> {
        let http = self
            .http_client
            .get(self.url(&format!("subscriptions/{}", subscription_id)));
        let current: StripeSubscription = self.send(http).await?;
        let item_id = current
            .item_id()
            .ok_or_else(|| ProviderError::api("Subscription has no items"))?
            .to_string();

        let proration = if change.prorate {
            "create_prorations"
        } else {
            "none"
        };
        let http = self
            .http_client
            .post(self.url(&format!("subscriptions/{}", subscription_id)))
            .form(&[
                ("items[0][id]", item_id.as_str()),
                ("items[0][price]", change.price_id.as_str()),
                ("proration_behavior", proration),
            ]);
        let sub: StripeSubscription = self.send(http).await?;
        Ok(Self::to_provider_subscription(sub))
    }

    async fn resume_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let http = self
            .http_client
            .post(self.url(&format!("subscriptions/{}", subscription_id)))
            .form(&[("cancel_at_period_end", "false")]);
        let sub: StripeSubscription = self.send(http).await?;
        Ok(Self::to_provider_subscription(sub))
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let tenant_id = request.tenant_id.to_string();
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("customer_email", request.email),
            ("line_items[0][price]", request.price_id),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
            ("client_reference_id", tenant_id.clone()),
            ("subscription_data[metadata][tenant_id]", tenant_id),
        ];
        if let Some(days) = request.trial_days.filter(|d| *d > 0) {
            params.push(("subscription_data[trial_period_days]", days.to_string()));
        }

        let http = self
            .http_client
            .post(self.url("checkout/sessions"))
            .form(&params);
        let session: StripeCheckoutSession = self.send(http).await?;

        let url = session
            .url
            .ok_or_else(|| ProviderError::api("Checkout session has no URL"))?;
        Ok(CheckoutSession {
            id: session.id,
            url,
            expires_at: session.expires_at.unwrap_or_default(),
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, ProviderError> {
        #[derive(Deserialize)]
        struct PortalSessionResponse {
            id: String,
            url: String,
        }

        let http = self
            .http_client
            .post(self.url("billing_portal/sessions"))
            .form(&[("customer", customer_id), ("return_url", return_url)]);
        let portal: PortalSessionResponse = self.send(http).await?;

        Ok(PortalSession {
            id: portal.id,
            url: portal.url,
        })
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), ProviderError> {
        let header = SignatureHeader::parse(signature_header)
            .map_err(|e| ProviderError::invalid_signature(e.to_string()))?;
        self.verify_signature_at(payload, &header, chrono::Utc::now().timestamp())
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProviderEvent, ProviderError> {
        let stripe_event: StripeWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::invalid_payload(format!("Invalid JSON: {}", e)))?;

        if self.config.require_livemode && !stripe_event.livemode {
            return Err(ProviderError::invalid_payload(
                "Test mode events not allowed in production",
            ));
        }

        let event_id = stripe_event.id.clone();
        stripe_event.into_provider_event().map_err(|e| {
            ProviderError::invalid_payload(format!("Invalid object in event {}: {}", event_id, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::ProviderEventType;
    use crate::ports::ProviderErrorCode;

    const SECRET: &str = "whsec_test_secret";

    fn adapter() -> StripeBillingProvider {
        StripeBillingProvider::new(StripeConfig::new("sk_test_key", SECRET))
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn header(secret: &str, timestamp: i64, payload: &str) -> SignatureHeader {
        SignatureHeader::parse(&sign(secret, timestamp, payload)).unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn config_new_sets_defaults() {
        let config = StripeConfig::new("api_key", "webhook_secret");
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert!(!config.require_livemode);
    }

    #[test]
    fn config_with_base_url() {
        let config = StripeConfig::new("key", "secret").with_base_url("http://localhost:12111");
        assert_eq!(config.api_base_url, "http://localhost:12111");
    }

    #[test]
    fn names_itself_stripe() {
        let adapter = adapter();
        assert_eq!(adapter.name(), "stripe");
        assert_eq!(adapter.signature_header(), "Stripe-Signature");
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Signature Verification Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn verify_signature_valid() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = 1_704_067_200;
        let result = adapter().verify_signature_at(payload.as_bytes(), &header(SECRET, now, payload), now);
        assert!(result.is_ok());
    }

    #[test]
    fn verify_signature_wrong_secret() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = 1_704_067_200;
        let err = adapter()
            .verify_signature_at(payload.as_bytes(), &header("wrong", now, payload), now)
            .unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidSignature);
    }

    #[test]
    fn verify_signature_tampered_payload() {
        let now = 1_704_067_200;
        let signed = header(SECRET, now, r#"{"id":"evt_test"}"#);
        let err = adapter()
            .verify_signature_at(br#"{"id":"evt_other"}"#, &signed, now)
            .unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidSignature);
    }

    #[test]
    fn verify_signature_expired_timestamp() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = 1_704_067_200;
        let err = adapter()
            .verify_signature_at(payload.as_bytes(), &header(SECRET, now - 600, payload), now)
            .unwrap_err();
        assert!(err.message.contains("too old"));
    }

    #[test]
    fn verify_signature_future_timestamp() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = 1_704_067_200;
        let err = adapter()
            .verify_signature_at(payload.as_bytes(), &header(SECRET, now + 120, payload), now)
            .unwrap_err();
        assert!(err.message.contains("future"));
    }

    #[test]
    fn verify_signature_small_future_tolerance() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = 1_704_067_200;
        let result =
            adapter().verify_signature_at(payload.as_bytes(), &header(SECRET, now + 30, payload), now);
        assert!(result.is_ok());
    }

    #[test]
    fn any_matching_v1_signature_is_accepted() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = 1_704_067_200;
        let good = sign(SECRET, now, payload);
        let rotated = format!("t={},v1={},{}", now, "00".repeat(32), good.split(',').nth(1).unwrap());
        let header = SignatureHeader::parse(&rotated).unwrap();
        assert!(adapter()
            .verify_signature_at(payload.as_bytes(), &header, now)
            .is_ok());
    }

    #[test]
    fn malformed_header_is_invalid_signature() {
        let err = adapter()
            .verify_webhook_signature(b"{}", "garbage")
            .unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidSignature);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Event Parsing Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn parse_payment_failed_event() {
        let payload = br#"{
            "id": "evt_fail",
            "type": "invoice.payment_failed",
            "created": 1704067200,
            "livemode": false,
            "data": {"object": {
                "id": "in_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "attempt_count": 2
            }}
        }"#;

        let event = adapter().parse_event(payload).unwrap();
        assert_eq!(event.event_type, ProviderEventType::PaymentFailed);
        assert_eq!(event.external_subscription_id(), Some("sub_1"));
        assert_eq!(event.invoice().unwrap().attempt_count, 2);
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let err = adapter().parse_event(b"not json").unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidPayload);
    }

    #[test]
    fn parse_rejects_test_events_when_livemode_required() {
        let adapter = StripeBillingProvider::new(
            StripeConfig::new("sk_live_key", SECRET).with_require_livemode(true),
        );
        let payload = br#"{"id":"evt_1","type":"invoice.paid","created":1,"livemode":false,
            "data":{"object":{"id":"in_1"}}}"#;
        let err = adapter.parse_event(payload).unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidPayload);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Error Classification Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn rate_limit_response_is_retryable() {
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err.code, ProviderErrorCode::RateLimit);
        assert!(err.retryable);
    }

    #[test]
    fn server_error_is_retryable() {
        let err = classify_response(StatusCode::BAD_GATEWAY, "");
        assert!(err.retryable);
    }

    #[test]
    fn card_error_keeps_stripe_code() {
        let body = r#"{"error":{"type":"card_error","code":"card_declined","message":"Your card was declined."}}"#;
        let err = classify_response(StatusCode::PAYMENT_REQUIRED, body);
        assert_eq!(err.code, ProviderErrorCode::Api);
        assert_eq!(err.provider_code.as_deref(), Some("card_declined"));
        assert_eq!(err.message, "Your card was declined.");
        assert!(!err.retryable);
    }

    #[test]
    fn not_found_response_maps_to_not_found() {
        let err = classify_response(StatusCode::NOT_FOUND, "");
        assert_eq!(err.code, ProviderErrorCode::NotFound);
    }
}
