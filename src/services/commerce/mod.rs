/// Cart, checkout and payment callback services
pub mod cart_service;
pub mod checkout_service;
pub mod payment_webhook_service;

pub use cart_service::{CartItemView, CartService, CartValidation, CartView};
pub use checkout_service::{CheckoutService, CheckoutSessionCreated, CheckoutSettings, StartCheckout};
pub use payment_webhook_service::PaymentWebhookService;
