use super::{EmailMessage, EmailProvider, NotificationError};
use crate::webhooks::SignatureGenerator;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, instrument};

const PROVIDER: &str = "relay";

/// Backup transport: posts the message as signed JSON to an email relay
/// webhook. With a secret configured the request carries `Timestamp` and
/// `X-Relay-Signature` (hex HMAC-SHA256 of `"{timestamp}.{body}"`).
#[derive(Clone)]
pub struct RelayEmailProvider {
    client: reqwest::Client,
    url: String,
    signer: Option<SignatureGenerator>,
}

impl RelayEmailProvider {
    pub fn new(url: String, secret: Option<String>) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotificationError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            url,
            signer: secret.filter(|s| !s.is_empty()).map(SignatureGenerator::new),
        })
    }
}

#[async_trait]
impl EmailProvider for RelayEmailProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let body = serde_json::to_vec(message)?;
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Timestamp", &timestamp);

        if let Some(signer) = &self.signer {
            let signature = signer
                .sign_payload(&timestamp, &body)
                .map_err(|e| NotificationError::provider(PROVIDER, e.to_string()))?;
            request = request.header("X-Relay-Signature", signature);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotificationError::provider(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::provider(
                PROVIDER,
                format!("HTTP {}", response.status().as_u16()),
            ));
        }

        info!("email handed to relay");
        Ok(())
    }
}
