use crate::{
    entities::{
        commerce::{checkout_session, CheckoutLineItem, CheckoutStatus},
        User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::CartService,
        payments::{to_minor_units, CreateSessionRequest, PaymentGateway, SessionLineItem},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Placeholder the provider substitutes with the real session id
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub frontend_url: String,
}

impl CheckoutSettings {
    pub fn default_success_url(&self) -> String {
        format!(
            "{}/checkout/success?session_id={}",
            self.frontend_url.trim_end_matches('/'),
            SESSION_ID_PLACEHOLDER
        )
    }

    pub fn default_cancel_url(&self) -> String {
        format!("{}/cart", self.frontend_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartCheckout {
    pub user_id: Uuid,
    pub customer_email: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionCreated {
    pub session_id: String,
    pub url: Option<String>,
}

/// Opens hosted checkout sessions from validated carts.
///
/// The cart is snapshotted into a pending `checkout_sessions` row keyed by
/// the provider's session id; the webhook handler materializes the order
/// from that snapshot.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    cart_service: Arc<CartService>,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        cart_service: Arc<CartService>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            cart_service,
            gateway,
            settings,
        }
    }

    fn session_line_items(
        items: &[CheckoutLineItem],
    ) -> Result<Vec<SessionLineItem>, ServiceError> {
        items
            .iter()
            .map(|item| {
                let unit_amount = to_minor_units(item.unit_price).ok_or_else(|| {
                    ServiceError::InvalidInput(format!(
                        "Price of {} cannot be charged",
                        item.product_name
                    ))
                })?;
                Ok(SessionLineItem {
                    name: item.product_name.clone(),
                    unit_amount,
                    quantity: item.quantity,
                })
            })
            .collect()
    }

    async fn customer_email(&self, request: &StartCheckout) -> Result<Option<String>, ServiceError> {
        if let Some(email) = request.customer_email.as_ref().filter(|e| !e.is_empty()) {
            return Ok(Some(email.clone()));
        }
        Ok(User::find_by_id(request.user_id)
            .one(&*self.db)
            .await?
            .map(|u| u.email))
    }

    /// Validates the cart, opens a provider session priced from the cart's
    /// snapshot prices and records the pending checkout.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_checkout_session(
        &self,
        request: StartCheckout,
    ) -> Result<CheckoutSessionCreated, ServiceError> {
        let (cart, snapshot) = self.cart_service.checkout_snapshot(request.user_id).await?;
        let line_items = Self::session_line_items(&snapshot)?;
        let total: Decimal = snapshot.iter().map(CheckoutLineItem::line_total).sum();
        let customer_email = self.customer_email(&request).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), request.user_id.to_string());
        metadata.insert("cart_id".to_string(), cart.id.to_string());

        let session = self
            .gateway
            .create_checkout_session(&CreateSessionRequest {
                line_items,
                currency: self.settings.currency.clone(),
                success_url: request
                    .success_url
                    .clone()
                    .unwrap_or_else(|| self.settings.default_success_url()),
                cancel_url: request
                    .cancel_url
                    .clone()
                    .unwrap_or_else(|| self.settings.default_cancel_url()),
                customer_email: customer_email.clone(),
                metadata,
            })
            .await?;

        let now = Utc::now();
        let pending = checkout_session::ActiveModel {
            id: Set(session.id.clone()),
            user_id: Set(request.user_id),
            cart_id: Set(cart.id),
            status: Set(CheckoutStatus::Open),
            line_items: Set(serde_json::to_value(&snapshot)?),
            total_amount: Set(total),
            currency: Set(self.settings.currency.clone()),
            customer_email: Set(customer_email),
            payment_intent_id: Set(None),
            order_id: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        if let Err(e) = pending.insert(&*self.db).await {
            // the provider session stays live; the caller gets an error and
            // the session id is logged for reconciliation
            error!(session_id = %session.id, error = %e, "failed to record pending checkout");
            return Err(e.into());
        }

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                session_id: session.id.clone(),
                user_id: request.user_id,
                total,
            })
            .await;

        info!(session_id = %session.id, %total, "checkout session opened");
        Ok(CheckoutSessionCreated {
            session_id: session.id,
            url: session.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_urls_follow_frontend() {
        let settings = CheckoutSettings {
            currency: "usd".into(),
            frontend_url: "https://shop.test/".into(),
        };
        assert_eq!(
            settings.default_success_url(),
            "https://shop.test/checkout/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(settings.default_cancel_url(), "https://shop.test/cart");
    }

    #[test]
    fn line_items_use_snapshot_minor_units() {
        let items = vec![CheckoutLineItem {
            product_id: Uuid::new_v4(),
            product_name: "Linen Shirt".into(),
            quantity: 3,
            unit_price: dec!(10.00),
        }];

        let lines = CheckoutService::session_line_items(&items).unwrap();
        assert_eq!(
            lines,
            vec![SessionLineItem {
                name: "Linen Shirt".into(),
                unit_amount: 1000,
                quantity: 3,
            }]
        );
    }
}
