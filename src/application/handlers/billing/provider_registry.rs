//! ProviderRegistry - maps provider names to gateways.
//!
//! Exactly one provider is active at a time. Webhooks for any other name are
//! rejected as a configuration error before anything is persisted.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::billing::BillingError;
use crate::ports::BillingProvider;

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn BillingProvider>>,
    active: String,
}

impl ProviderRegistry {
    pub fn new(active: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            active: active.into(),
        }
    }

    /// Registers a gateway under its own name, replacing any previous one.
    pub fn register(mut self, provider: Arc<dyn BillingProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    /// The gateway webhooks for `name` must go through.
    ///
    /// # Errors
    ///
    /// `Configuration` if `name` is unknown or not the active provider.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BillingProvider>, BillingError> {
        if name != self.active {
            return Err(BillingError::configuration(format!(
                "Provider '{}' is not active (active: '{}')",
                name, self.active
            )));
        }
        self.get(name)
            .ok_or_else(|| BillingError::configuration(format!("Unknown provider '{}'", name)))
    }

    /// The active gateway.
    pub fn active(&self) -> Result<Arc<dyn BillingProvider>, BillingError> {
        self.resolve(&self.active)
    }

    /// Any registered gateway, active or not.
    ///
    /// Used to re-parse payloads that were accepted while `name` was active.
    pub fn get(&self, name: &str) -> Option<Arc<dyn BillingProvider>> {
        self.providers.get(name).cloned()
    }
}
