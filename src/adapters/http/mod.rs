//! HTTP adapters.

pub mod webhooks;

pub use webhooks::{webhook_router, WebhookAppState};
