//! Webhook HTTP endpoint.

mod dto;
mod handlers;
mod routes;

pub use dto::{ErrorResponse, WebhookResponse};
pub use handlers::{receive_webhook, WebhookApiError, WebhookAppState};
pub use routes::webhook_router;
