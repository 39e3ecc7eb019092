//! Billing error taxonomy.
//!
//! Every failure crossing the application boundary is one of five classes.
//! An ignored transition is not an error and never shows up here.

use crate::domain::foundation::{DomainError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// Misconfiguration, e.g. an unknown provider name.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Webhook signature could not be verified.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Might succeed on a later attempt.
    #[error("Transient processing error: {0}")]
    TransientProcessing(String),

    /// Will fail the same way every time.
    #[error("Permanent processing error: {0}")]
    PermanentProcessing(String),
}

impl BillingError {
    pub fn configuration(message: impl Into<String>) -> Self {
        BillingError::Configuration(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        BillingError::Authentication(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        BillingError::TransientProcessing(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        BillingError::PermanentProcessing(message.into())
    }

    /// Returns true if the retry ledger should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::TransientProcessing(_))
    }

    /// Stable machine-readable class name.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Configuration(_) => "configuration_error",
            BillingError::Authentication(_) => "authentication_error",
            BillingError::Validation(_) => "validation_error",
            BillingError::TransientProcessing(_) => "transient_processing_error",
            BillingError::PermanentProcessing(_) => "permanent_processing_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BillingError::Configuration(m)
            | BillingError::Authentication(m)
            | BillingError::Validation(m)
            | BillingError::TransientProcessing(m)
            | BillingError::PermanentProcessing(m) => m,
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        if err.code.is_transient() {
            return BillingError::TransientProcessing(err.to_string());
        }
        match err.code {
            ErrorCode::ValidationFailed | ErrorCode::InvalidFormat => {
                BillingError::Validation(err.to_string())
            }
            _ => BillingError::PermanentProcessing(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(BillingError::transient("lock timeout").is_retryable());
        assert!(!BillingError::permanent("unknown plan").is_retryable());
        assert!(!BillingError::authentication("bad signature").is_retryable());
    }

    #[test]
    fn lock_timeout_maps_to_transient() {
        let err: BillingError = DomainError::new(ErrorCode::LockTimeout, "lock timeout").into();
        assert!(matches!(err, BillingError::TransientProcessing(_)));
    }

    #[test]
    fn constraint_violation_maps_to_permanent() {
        let err: BillingError =
            DomainError::new(ErrorCode::ConstraintViolation, "duplicate").into();
        assert!(matches!(err, BillingError::PermanentProcessing(_)));
    }

    #[test]
    fn display_includes_class() {
        let err = BillingError::configuration("unknown provider 'paddle'");
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown provider 'paddle'"
        );
        assert_eq!(err.code(), "configuration_error");
        assert_eq!(err.message(), "unknown provider 'paddle'");
    }
}
