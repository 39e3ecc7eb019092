//! Stripe billing provider adapter.
//!
//! Implements the `BillingProvider` port for Stripe, including:
//! - Customer management
//! - Subscription lifecycle
//! - Checkout and portal sessions
//! - Webhook signature verification and event parsing
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`

mod mock_billing_provider;
mod stripe_adapter;
mod webhook_types;

pub use mock_billing_provider::{MethodCall, MockBillingProvider};
pub use stripe_adapter::{StripeBillingProvider, StripeConfig, STRIPE_PROVIDER};
pub use webhook_types::{
    map_event_type, map_subscription_status, SignatureHeader, SignatureParseError,
    StripeCheckoutSession, StripeCustomer, StripeInvoice, StripeSubscription, StripeWebhookEvent,
};
