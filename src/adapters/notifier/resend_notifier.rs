//! Email notifier backed by the Resend HTTP API.
//!
//! Recipients come from the tenant directory. A notice counts as delivered
//! only when Resend answers with a message id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::billing::SubscriptionStatus;
use crate::ports::{Delivery, GraceNotice, GraceNotifier, NotifyError, TenantDirectory};

const RESEND_API_URL: &str = "https://api.resend.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    id: Option<String>,
}

pub struct ResendGraceNotifier {
    api_key: SecretString,
    from: String,
    api_base_url: String,
    directory: Arc<dyn TenantDirectory>,
    http_client: reqwest::Client,
}

impl ResendGraceNotifier {
    pub fn new(
        api_key: SecretString,
        from: impl Into<String>,
        directory: Arc<dyn TenantDirectory>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            from: from.into(),
            api_base_url: RESEND_API_URL.to_string(),
            directory,
            http_client,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

/// Subject and plain-text body for one notice.
fn render(notice: &GraceNotice, tenant_name: &str) -> (String, String) {
    let deadline = notice.grace_deadline.as_datetime().format("%Y-%m-%d %H:%M UTC");
    let days = if notice.day == 1 {
        "1 day".to_string()
    } else {
        format!("{} days", notice.day)
    };

    match notice.status {
        SubscriptionStatus::Trialing => (
            format!("Your trial ends in {}", days),
            format!(
                "Hi {},\n\nYour trial access ends on {}. Add a payment method \
                 before then to keep using the service without interruption.\n",
                tenant_name, deadline
            ),
        ),
        _ => (
            format!("Payment overdue: access ends in {}", days),
            format!(
                "Hi {},\n\nWe could not collect your last payment. Your access \
                 continues until {}. Update your payment details before then to \
                 avoid losing access.\n",
                tenant_name, deadline
            ),
        ),
    }
}

#[async_trait]
impl GraceNotifier for ResendGraceNotifier {
    async fn notify(&self, notice: &GraceNotice) -> Result<Delivery, NotifyError> {
        let tenant = self
            .directory
            .get(notice.tenant_id)
            .await
            .map_err(|e| NotifyError::Delivery(format!("Tenant lookup failed: {}", e)))?
            .ok_or(NotifyError::NoRecipient(notice.tenant_id))?;
        if tenant.email.trim().is_empty() {
            return Err(NotifyError::NoRecipient(notice.tenant_id));
        }

        let (subject, text) = render(notice, &tenant.name);
        let request = SendEmailRequest {
            from: &self.from,
            to: vec![tenant.email.as_str()],
            subject,
            text,
        };

        let response = self
            .http_client
            .post(format!("{}/emails", self.api_base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Delivery(format!("Resend returned {}: {}", status, body)));
        }

        // An accepted request without a message id is not proof of delivery.
        let delivery = match response.json::<SendEmailResponse>().await {
            Ok(SendEmailResponse { id: Some(_) }) => Delivery::Confirmed,
            _ => Delivery::Unconfirmed,
        };
        tracing::debug!(tenant_id = %notice.tenant_id, day = notice.day, ?delivery, "Grace email sent");
        Ok(delivery)
    }
}
