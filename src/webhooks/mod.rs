/// Inbound payment-provider webhooks
pub mod stripe_event;
pub mod stripe_signature;

pub use stripe_event::{CheckoutSessionObject, PaymentIntentObject, StripeEvent};
pub use stripe_signature::{SignatureGenerator, StripeSignatureVerifier, WebhookError};
