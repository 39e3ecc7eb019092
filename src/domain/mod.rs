//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (IDs, timestamps, errors)
//! - `billing` - Subscription lifecycle, grace policy and plan limits

pub mod billing;
pub mod foundation;
