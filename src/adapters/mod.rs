//! Adapters - Implementations of port interfaces.
//!
//! - `catalog` - YAML plan catalog and tenant directory
//! - `http` - Axum webhook endpoint
//! - `memory` - In-memory store and ledgers for tests and local runs
//! - `notifier` - Grace notice delivery (log, Resend)
//! - `postgres` - sqlx store, readers and ledgers
//! - `stripe` - Stripe gateway and a configurable mock

pub mod catalog;
pub mod http;
pub mod memory;
pub mod notifier;
pub mod postgres;
pub mod stripe;
