//! `Stripe-Signature` verification.
//!
//! The header looks like `t=1700000000,v1=<hex>,v1=<hex>,v0=<hex>`. Each `v1`
//! value is an HMAC-SHA256 of `"{t}.{raw body}"` keyed with the endpoint's
//! signing secret; any matching `v1` is accepted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Webhook signing secret is not configured")]
    MissingSecret,

    #[error("Missing stripe-signature header")]
    MissingHeader,

    #[error("Unable to extract timestamp and signatures from header")]
    MalformedHeader,

    #[error("No signatures found matching the expected signature for payload")]
    NoMatchingSignature,

    #[error("Timestamp outside the tolerance zone")]
    TimestampOutsideTolerance,

    #[error("Invalid signing key")]
    InvalidKey,
}

/// HMAC signature generator for webhook payloads
#[derive(Clone)]
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac_for(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| WebhookError::InvalidKey)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// Hex HMAC-SHA256 of `"{timestamp}.{body}"`
    pub fn sign_payload(&self, timestamp: &str, body: &[u8]) -> Result<String, WebhookError> {
        let mac = self.mac_for(timestamp, body)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Full `stripe-signature` header value for `body` signed at `timestamp`
    pub fn header_value(&self, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
        let signature = self.sign_payload(&timestamp.to_string(), body)?;
        Ok(format!("t={},v1={}", timestamp, signature))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            // undecodable candidates simply never match
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(ParsedHeader {
            timestamp,
            signatures,
        }),
        _ => Err(WebhookError::MalformedHeader),
    }
}

/// Verifies webhook payloads against the configured signing secret
#[derive(Clone)]
pub struct StripeSignatureVerifier {
    generator: SignatureGenerator,
    tolerance: Duration,
}

impl StripeSignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            generator: SignatureGenerator::new(secret),
            tolerance,
        }
    }

    /// Checks `header` against `payload` using the current time
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), WebhookError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<(), WebhookError> {
        let header = header.ok_or(WebhookError::MissingHeader)?;
        let parsed = parse_header(header)?;

        let mac = self
            .generator
            .mac_for(&parsed.timestamp.to_string(), payload)?;

        // verify_slice compares in constant time
        let matched = parsed
            .signatures
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
        if !matched {
            return Err(WebhookError::NoMatchingSignature);
        }

        let age = now.saturating_sub(parsed.timestamp).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(WebhookError::TimestampOutsideTolerance);
        }

        Ok(())
    }
}
