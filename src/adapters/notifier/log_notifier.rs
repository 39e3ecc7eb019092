//! Notifier that writes grace notices to the log.
//!
//! Used when no email provider is configured. A written log line counts as
//! delivered.

use async_trait::async_trait;

use crate::ports::{Delivery, GraceNotice, GraceNotifier, NotifyError};

#[derive(Debug, Clone, Default)]
pub struct LogGraceNotifier;

impl LogGraceNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraceNotifier for LogGraceNotifier {
    async fn notify(&self, notice: &GraceNotice) -> Result<Delivery, NotifyError> {
        tracing::info!(
            tenant_id = %notice.tenant_id,
            subscription_id = %notice.subscription_id,
            status = %notice.status,
            day = notice.day,
            grace_deadline = %notice.grace_deadline,
            "Grace period notice"
        );
        Ok(Delivery::Confirmed)
    }
}
