//! Billing lifecycle configuration: grace periods, retries and reference data.

use serde::Deserialize;
use std::time::Duration;

use crate::domain::billing::{
    GracePolicy, RetryPolicy, DEFAULT_GRACE_DAYS, DEFAULT_NOTIFICATION_DAYS,
};

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Days of continued access after a failed payment
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,

    /// Days-before-deadline on which reminders go out
    #[serde(default = "default_notification_days")]
    pub notification_days: Vec<u32>,

    #[serde(default = "default_webhook_max_attempts")]
    pub webhook_max_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    /// Per-webhook processing budget
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,

    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: u32,

    /// YAML plan catalog
    #[serde(default = "default_plans_file")]
    pub plans_file: String,

    /// YAML tenant directory
    #[serde(default = "default_tenants_file")]
    pub tenants_file: String,
}

impl BillingConfig {
    pub fn grace_policy(&self) -> GracePolicy {
        GracePolicy::new(self.grace_days, self.notification_days.iter().copied())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.webhook_max_attempts,
            base_delay: chrono::Duration::seconds(clamp_secs(self.retry_base_delay_secs)),
            max_delay: chrono::Duration::seconds(clamp_secs(self.retry_max_delay_secs)),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grace_days == 0 || self.grace_days > 90 {
            return Err(ValidationError::InvalidGraceDays);
        }
        if self
            .notification_days
            .iter()
            .any(|day| *day == 0 || *day > self.grace_days)
        {
            return Err(ValidationError::InvalidNotificationDays);
        }
        if self.webhook_max_attempts == 0 {
            return Err(ValidationError::InvalidRetrySettings("webhook_max_attempts"));
        }
        if self.retry_base_delay_secs == 0 || self.retry_base_delay_secs > self.retry_max_delay_secs
        {
            return Err(ValidationError::InvalidRetrySettings("retry delays"));
        }
        if self.webhook_timeout_secs == 0 {
            return Err(ValidationError::InvalidRetrySettings("webhook_timeout_secs"));
        }
        if self.retry_batch_size == 0 {
            return Err(ValidationError::InvalidRetrySettings("retry_batch_size"));
        }
        if self.plans_file.is_empty() {
            return Err(ValidationError::MissingRequired("BILLING__PLANS_FILE"));
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_days: default_grace_days(),
            notification_days: default_notification_days(),
            webhook_max_attempts: default_webhook_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            webhook_timeout_secs: default_webhook_timeout(),
            retry_batch_size: default_retry_batch_size(),
            plans_file: default_plans_file(),
            tenants_file: default_tenants_file(),
        }
    }
}

fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 1_000)
}

fn default_grace_days() -> u32 {
    DEFAULT_GRACE_DAYS
}

fn default_notification_days() -> Vec<u32> {
    DEFAULT_NOTIFICATION_DAYS.to_vec()
}

fn default_webhook_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    60
}

fn default_retry_max_delay() -> u64 {
    21_600
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_retry_batch_size() -> u32 {
    100
}

fn default_plans_file() -> String {
    "config/plans.yaml".to_string()
}

fn default_tenants_file() -> String {
    "config/tenants.yaml".to_string()
}
