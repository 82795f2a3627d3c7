use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::notifications::{NotificationSender, NotificationTemplate},
    infra::http_client,
};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Sends lifecycle notification emails through Resend.
pub struct ResendNotificationSender {
    client: Client,
    api_key: SecretString,
    from: String,
}

impl ResendNotificationSender {
    pub fn new(api_key: SecretString, from: String) -> Self {
        Self {
            client: http_client::build_client(),
            api_key,
            from,
        }
    }
}

#[derive(Serialize)]
struct ResendReq<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[async_trait]
impl NotificationSender for ResendNotificationSender {
    async fn send(&self, to: &str, template: &NotificationTemplate) -> AppResult<()> {
        let subject = template.subject();
        let html = template.html();
        let req = ResendReq {
            from: &self.from,
            to: [to],
            subject: &subject,
            html: &html,
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&req)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Resend request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Resend API error");
            return Err(AppError::Provider(format!(
                "Resend API error: {}",
                status
            )));
        }

        tracing::info!(kind = template.kind(), "Notification email sent");
        Ok(())
    }
}
