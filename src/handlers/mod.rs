pub mod carts;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use crate::{
    config::AppConfig,
    events::EventSender,
    notifications::{templates::OrderNotifier, EmailDispatcher},
    services::{
        commerce::{CartService, CheckoutService, CheckoutSettings, PaymentWebhookService},
        orders::OrderService,
        payments::PaymentGateway,
    },
    webhooks::StripeSignatureVerifier,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::warn;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<PaymentWebhookService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Wires the services around clients built once at start-up
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        email: Arc<EmailDispatcher>,
        config: &AppConfig,
    ) -> Self {
        let cart = Arc::new(CartService::new(db.clone(), event_sender.clone()));

        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            cart.clone(),
            gateway,
            CheckoutSettings {
                currency: config.currency.clone(),
                frontend_url: config.frontend_url.clone(),
            },
        ));

        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            cart.clone(),
            OrderNotifier::new(email),
        ));

        let verifier = match config.stripe_webhook_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Some(StripeSignatureVerifier::new(
                secret,
                config.webhook_tolerance(),
            )),
            _ => {
                warn!("Stripe webhook secret not configured; webhooks will be rejected");
                None
            }
        };

        let webhooks = Arc::new(PaymentWebhookService::new(
            db,
            event_sender,
            cart.clone(),
            orders.clone(),
            verifier,
            config.currency.clone(),
        ));

        Self {
            cart,
            checkout,
            webhooks,
            orders,
        }
    }
}
