//! Tenant Billing - subscription lifecycle for multi-tenant SaaS.
//!
//! Applies payment-provider webhooks to a per-tenant subscription state
//! machine, runs grace-period reminders and expirations, and answers plan
//! limit checks.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
