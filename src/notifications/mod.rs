//! Transactional email with retry and provider fallback.

use crate::config::AppConfig;
use crate::middleware_helpers::retry::{with_retry, AlwaysRetry, RetryConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

pub mod relay;
pub mod sendgrid;
pub mod templates;

pub use relay::RelayEmailProvider;
pub use sendgrid::SendGridProvider;
pub use templates::OrderNotifier;

/// Rendered email ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("email delivery failed: {root_cause}")]
    Delivery {
        root_cause: String,
        backup_error: Option<String>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    pub fn provider(provider: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// A transport able to deliver one email
#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

/// Writes emails to the log; used when no email API key is configured
#[derive(Debug, Default, Clone)]
pub struct LoggingEmailProvider;

#[async_trait]
impl EmailProvider for LoggingEmailProvider {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        info!(to = %message.to, subject = %message.subject, "email (log only)");
        Ok(())
    }
}

/// Sends through a primary provider with retries, then once through the backup
#[derive(Clone)]
pub struct EmailDispatcher {
    primary: Arc<dyn EmailProvider>,
    backup: Option<Arc<dyn EmailProvider>>,
    backoff_base: Duration,
    max_retries: u32,
}

impl EmailDispatcher {
    pub fn new(
        primary: Arc<dyn EmailProvider>,
        backup: Option<Arc<dyn EmailProvider>>,
        backoff_base: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            primary,
            backup,
            backoff_base,
            max_retries,
        }
    }

    /// Builds the provider chain described by the configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, NotificationError> {
        let primary: Arc<dyn EmailProvider> = match &config.sendgrid_api_key {
            Some(key) if !key.is_empty() => Arc::new(SendGridProvider::new(
                key.clone(),
                config.sendgrid_api_base.clone(),
                config.sendgrid_from_email.clone(),
            )?),
            _ => {
                warn!("SendGrid API key not configured; emails will only be logged");
                Arc::new(LoggingEmailProvider)
            }
        };

        let backup: Option<Arc<dyn EmailProvider>> = match &config.backup_email_webhook_url {
            Some(url) if !url.is_empty() => Some(Arc::new(RelayEmailProvider::new(
                url.clone(),
                config.backup_email_webhook_secret.clone(),
            )?)),
            _ => None,
        };

        Ok(Self::new(
            primary,
            backup,
            config.email_backoff_base(),
            config.email_max_retries,
        ))
    }

    /// Sends with the configured retry budget
    pub async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        self.send_email(message, self.max_retries).await
    }

    /// Makes up to `max_retries` primary attempts waiting `base * 2^n` between
    /// them, then one backup attempt. The terminal error names the primary cause.
    #[instrument(skip(self, message), fields(to = %message.to, subject = %message.subject))]
    pub async fn send_email(
        &self,
        message: &EmailMessage,
        max_retries: u32,
    ) -> Result<(), NotificationError> {
        let retry = RetryConfig::exponential(max_retries, self.backoff_base);
        let primary = self.primary.clone();

        let root_cause = match with_retry(&retry, AlwaysRetry, || {
            let primary = primary.clone();
            async move { primary.send(message).await }
        })
        .await
        {
            Ok(()) => {
                info!(provider = self.primary.name(), "email sent");
                return Ok(());
            }
            Err(e) => e.to_string(),
        };

        let Some(backup) = &self.backup else {
            error!(%root_cause, "email delivery failed and no backup provider is configured");
            return Err(NotificationError::Delivery {
                root_cause,
                backup_error: None,
            });
        };

        warn!(%root_cause, backup = backup.name(), "primary email provider exhausted, trying backup");
        match backup.send(message).await {
            Ok(()) => {
                info!(provider = backup.name(), "email sent through backup provider");
                Ok(())
            }
            Err(backup_err) => {
                error!(%root_cause, backup_error = %backup_err, "email delivery failed on every provider");
                Err(NotificationError::Delivery {
                    root_cause,
                    backup_error: Some(backup_err.to_string()),
                })
            }
        }
    }
}
