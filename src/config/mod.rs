//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `TENANT_BILLING`
//! prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use tenant_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Grace period: {} days", config.billing.grace_days);
//! ```

mod billing;
mod database;
mod email;
mod error;
mod payment;
mod server;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use email::EmailConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::{PaymentConfig, KNOWN_PROVIDERS};
pub use server::ServerConfig;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Webhook listener (host, port, log filter)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Active provider and its credentials
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Grace periods, retries, reference data files
    #[serde(default)]
    pub billing: BillingConfig,

    /// Email delivery (Resend); absent means log-only notices
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `TENANT_BILLING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Splits `BILLING__NOTIFICATION_DAYS` on commas
    ///
    /// # Environment Variable Format
    ///
    /// - `TENANT_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `TENANT_BILLING__BILLING__NOTIFICATION_DAYS=7,3,1` -> `billing.notification_days = [7, 3, 1]`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("TENANT_BILLING")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("billing.notification_days")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.payment.validate()?;
        self.billing.validate()?;
        if let Some(email) = &self.email {
            email.validate()?;
        }
        Ok(())
    }
}
