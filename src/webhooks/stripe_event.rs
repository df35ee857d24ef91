use serde::Deserialize;
use std::collections::HashMap;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_SESSION_ASYNC_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";
pub const CHECKOUT_SESSION_EXPIRED: &str = "checkout.session.expired";
pub const PAYMENT_INTENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Envelope of every webhook event
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// The `checkout.session` object carried by checkout events
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

/// The `payment_intent` object carried by payment-intent events
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<serde_json::Value>,
}

impl CheckoutSessionObject {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Email the customer entered at checkout, if any
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

impl StripeEvent {
    pub fn checkout_session(&self) -> Result<CheckoutSessionObject, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }

    pub fn payment_intent(&self) -> Result<PaymentIntentObject, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completed_checkout_session() {
        let raw = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "object": "checkout.session",
                    "payment_status": "paid",
                    "payment_intent": "pi_1",
                    "customer_details": { "email": "ada@example.com" },
                    "metadata": { "user_id": "u", "cart_id": "c" },
                    "amount_total": 3000
                }
            }
        });

        let event: StripeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, CHECKOUT_SESSION_COMPLETED);

        let session = event.checkout_session().unwrap();
        assert!(session.is_paid());
        assert_eq!(session.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(session.email(), Some("ada@example.com"));
        assert_eq!(session.metadata.get("cart_id").map(String::as_str), Some("c"));
    }
}
