use super::{EmailMessage, EmailProvider, NotificationError};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

const PROVIDER: &str = "sendgrid";

/// SendGrid v3 mail-send client
#[derive(Clone)]
pub struct SendGridProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    from_email: String,
}

impl SendGridProvider {
    pub fn new(
        api_key: String,
        api_base: String,
        from_email: String,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotificationError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            api_base,
            from_email,
        })
    }

    fn payload(&self, message: &EmailMessage) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from_email },
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.text_body },
                { "type": "text/html", "value": message.html_body }
            ]
        })
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let url = format!("{}/v3/mail/send", self.api_base.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(message))
            .send()
            .await
            .map_err(|e| NotificationError::provider(PROVIDER, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::provider(
                PROVIDER,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        debug!(status = status.as_u16(), "SendGrid accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_both_bodies() {
        let provider = SendGridProvider::new(
            "SG.key".into(),
            "https://api.sendgrid.com".into(),
            "orders@boutique.local".into(),
        )
        .unwrap();
        let payload = provider.payload(&EmailMessage {
            to: "ada@example.com".into(),
            subject: "Hello".into(),
            html_body: "<b>hi</b>".into(),
            text_body: "hi".into(),
        });

        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "ada@example.com");
        assert_eq!(payload["from"]["email"], "orders@boutique.local");
        assert_eq!(payload["content"][1]["value"], "<b>hi</b>");
    }
}
