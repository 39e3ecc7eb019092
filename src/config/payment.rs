//! Payment provider configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Providers this binary can construct.
pub const KNOWN_PROVIDERS: [&str; 2] = ["stripe", "mock"];

/// Payment configuration.
///
/// One provider is active at a time. Stripe credentials are only required
/// when Stripe is the active provider.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Registry name of the active provider
    #[serde(default = "default_active_provider")]
    pub active_provider: String,

    /// Stripe API key
    #[serde(default)]
    pub stripe_api_key: String,

    /// Stripe webhook signing secret
    #[serde(default)]
    pub stripe_webhook_secret: String,

    /// Override for the Stripe API host
    pub stripe_api_base_url: Option<String>,

    /// Reject test-mode events
    #[serde(default)]
    pub stripe_require_livemode: bool,
}

impl PaymentConfig {
    pub fn is_stripe(&self) -> bool {
        self.active_provider == "stripe"
    }

    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !KNOWN_PROVIDERS.contains(&self.active_provider.as_str()) {
            return Err(ValidationError::UnknownProvider(self.active_provider.clone()));
        }
        if !self.is_stripe() {
            return Ok(());
        }

        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_WEBHOOK_SECRET"));
        }
        if !self.stripe_api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }
        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            active_provider: default_active_provider(),
            stripe_api_key: String::new(),
            stripe_webhook_secret: String::new(),
            stripe_api_base_url: None,
            stripe_require_livemode: false,
        }
    }
}

fn default_active_provider() -> String {
    "stripe".to_string()
}
