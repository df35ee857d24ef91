//! Payment-provider client used to open hosted checkout sessions.

use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// One priced line sent to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    pub name: String,
    /// Unit price in the currency's minor unit (cents)
    pub unit_amount: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub line_items: Vec<SessionLineItem>,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("payment provider unreachable: {0}")]
    Transport(String),

    #[error("payment provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

impl From<PaymentGatewayError> for ServiceError {
    fn from(err: PaymentGatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

/// Hosted checkout provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, PaymentGatewayError>;
}

/// Converts a decimal price into minor units, rounding half away from zero
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl From<&crate::config::AppConfig> for StripeConfig {
    fn from(cfg: &crate::config::AppConfig) -> Self {
        Self {
            secret_key: cfg.stripe_secret_key.clone(),
            api_base: cfg.stripe_api_base.clone(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Stripe Checkout client
#[derive(Clone, Debug)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentGatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Form fields in Stripe's bracketed encoding
    pub fn form_params(request: &CreateSessionRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
        ];

        if let Some(email) = &request.customer_email {
            params.push(("customer_email".to_string(), email.clone()));
        }

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            params.push((
                format!("{}[price_data][currency]", prefix),
                request.currency.clone(),
            ));
            params.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            params.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount.to_string(),
            ));
            params.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        // mirrored onto the payment intent for payment_intent.* events
        for (key, value) in &request.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
            params.push((
                format!("payment_intent_data[metadata][{}]", key),
                value.clone(),
            ));
        }

        params
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(items = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, PaymentGatewayError> {
        let url = format!(
            "{}/v1/checkout/sessions",
            self.config.api_base.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&Self::form_params(request))
            .send()
            .await
            .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&error_text)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(error_text);
            warn!(status = status.as_u16(), %message, "Stripe rejected checkout session");
            return Err(PaymentGatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let session: CreatedSession = response
            .json()
            .await
            .map_err(|e| PaymentGatewayError::InvalidResponse(e.to_string()))?;

        info!(session_id = %session.id, "checkout session created");
        Ok(session)
    }
}
