use crate::{
    entities::commerce::{checkout_session, CheckoutSession, CheckoutSessionModel, CheckoutStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::CartService,
        orders::{MaterializeOutcome, NewOrder, OrderService},
    },
    webhooks::{
        stripe_event::{
            CHECKOUT_SESSION_ASYNC_PAYMENT_FAILED, CHECKOUT_SESSION_COMPLETED,
            CHECKOUT_SESSION_EXPIRED, PAYMENT_INTENT_PAYMENT_FAILED,
        },
        CheckoutSessionObject, PaymentIntentObject, StripeEvent, StripeSignatureVerifier,
        WebhookError,
    },
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

impl From<WebhookError> for ServiceError {
    fn from(err: WebhookError) -> Self {
        ServiceError::WebhookSignature(err.to_string())
    }
}

/// Authenticates payment provider callbacks and drives the checkout state
/// machine: `open -> completed | failed | expired`.
#[derive(Clone)]
pub struct PaymentWebhookService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    cart_service: Arc<CartService>,
    order_service: Arc<OrderService>,
    verifier: Option<StripeSignatureVerifier>,
    currency: String,
}

impl PaymentWebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        cart_service: Arc<CartService>,
        order_service: Arc<OrderService>,
        verifier: Option<StripeSignatureVerifier>,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            cart_service,
            order_service,
            verifier,
            currency,
        }
    }

    /// Verifies and handles one delivery. `Ok` means the provider may stop
    /// redelivering; server errors ask it to try again.
    #[instrument(skip_all)]
    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> Result<(), ServiceError> {
        let verifier = self.verifier.as_ref().ok_or(WebhookError::MissingSecret)?;
        if let Err(e) = verifier.verify(payload, signature) {
            warn!(error = %e, "rejected webhook delivery");
            return Err(e.into());
        }

        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("Malformed webhook payload: {}", e)))?;
        info!(event_id = %event.id, event_type = %event.event_type, "webhook received");

        match event.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                let session = parse_object(event.checkout_session())?;
                if session.is_paid() {
                    self.complete_checkout(&session).await
                } else {
                    info!(
                        session_id = %session.id,
                        payment_status = ?session.payment_status,
                        "checkout completed without payment; waiting"
                    );
                    Ok(())
                }
            }
            CHECKOUT_SESSION_ASYNC_PAYMENT_FAILED => {
                let session = parse_object(event.checkout_session())?;
                warn!(session_id = %session.id, "asynchronous payment failed");
                self.close_checkout(&session.id, CheckoutStatus::Failed, Some("Payment failed"))
                    .await
            }
            CHECKOUT_SESSION_EXPIRED => {
                let session = parse_object(event.checkout_session())?;
                self.close_checkout(&session.id, CheckoutStatus::Expired, None)
                    .await
            }
            PAYMENT_INTENT_PAYMENT_FAILED => {
                let intent = parse_object(event.payment_intent())?;
                warn!(
                    payment_intent = %intent.id,
                    error = ?intent.last_payment_error,
                    "payment intent failed"
                );
                match self.checkout_for_intent(&intent).await? {
                    Some(session_id) => {
                        self.close_checkout(&session_id, CheckoutStatus::Failed, Some("Payment failed"))
                            .await
                    }
                    None => {
                        debug!(payment_intent = %intent.id, "no open checkout for failed intent");
                        Ok(())
                    }
                }
            }
            other => {
                debug!(event_type = %other, "ignoring webhook event");
                Ok(())
            }
        }
    }

    async fn complete_checkout(&self, session: &CheckoutSessionObject) -> Result<(), ServiceError> {
        let pending = CheckoutSession::find_by_id(session.id.clone())
            .one(&*self.db)
            .await?;

        let new_order = match pending {
            Some(pending) => self.order_from_pending(session, pending)?,
            None => match self.order_from_metadata(session).await? {
                Some(new_order) => new_order,
                None => return Ok(()),
            },
        };

        match self.order_service.materialize_order(new_order).await {
            Ok(MaterializeOutcome::Created(order)) => {
                info!(session_id = %session.id, order_id = %order.id, "checkout fulfilled");
                Ok(())
            }
            Ok(MaterializeOutcome::AlreadyProcessed(order)) => {
                info!(session_id = %session.id, order_id = %order.id, "duplicate delivery acknowledged");
                Ok(())
            }
            Ok(MaterializeOutcome::Skipped(reason)) => {
                warn!(session_id = %session.id, %reason, "checkout not materialized");
                Ok(())
            }
            Err(ServiceError::InsufficientStock(reason)) => {
                // paid but unfulfillable; refunds are handled by an operator
                warn!(session_id = %session.id, %reason, "paid checkout could not be fulfilled");
                self.close_checkout(&session.id, CheckoutStatus::Failed, Some(&reason))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    fn order_from_pending(
        &self,
        session: &CheckoutSessionObject,
        pending: CheckoutSessionModel,
    ) -> Result<NewOrder, ServiceError> {
        let items = pending.snapshot().map_err(|e| {
            ServiceError::InternalError(format!("corrupt checkout snapshot {}: {}", pending.id, e))
        })?;

        Ok(NewOrder {
            user_id: pending.user_id,
            payment_intent_id: payment_reference(session),
            checkout_session_id: Some(pending.id.clone()),
            pending_checkout: Some(pending.id),
            customer_email: session
                .email()
                .map(str::to_string)
                .or(pending.customer_email),
            currency: pending.currency,
            items,
        })
    }

    /// Sessions opened outside this service carry only their metadata
    async fn order_from_metadata(
        &self,
        session: &CheckoutSessionObject,
    ) -> Result<Option<NewOrder>, ServiceError> {
        let ids = (
            metadata_uuid(session, "user_id"),
            metadata_uuid(session, "cart_id"),
        );
        let (Some(user_id), Some(cart_id)) = ids else {
            warn!(session_id = %session.id, "checkout session has no usable metadata");
            return Ok(None);
        };

        let items = self.cart_service.priced_lines(cart_id).await?;
        Ok(Some(NewOrder {
            user_id,
            payment_intent_id: payment_reference(session),
            checkout_session_id: Some(session.id.clone()),
            pending_checkout: None,
            customer_email: session.email().map(str::to_string),
            currency: session
                .currency
                .clone()
                .unwrap_or_else(|| self.currency.clone()),
            items,
        }))
    }

    /// Newest open checkout for the cart and user carried in the intent metadata
    async fn checkout_for_intent(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<Option<String>, ServiceError> {
        let ids = (
            parse_uuid(&intent.metadata, "user_id"),
            parse_uuid(&intent.metadata, "cart_id"),
        );
        let (Some(user_id), Some(cart_id)) = ids else {
            return Ok(None);
        };

        let open = CheckoutSession::find()
            .filter(checkout_session::Column::UserId.eq(user_id))
            .filter(checkout_session::Column::CartId.eq(cart_id))
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::Open))
            .order_by_desc(checkout_session::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        Ok(open.map(|checkout| checkout.id))
    }

    /// Moves an open checkout to a closed state. Closed checkouts are left alone.
    async fn close_checkout(
        &self,
        session_id: &str,
        status: CheckoutStatus,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        let result = CheckoutSession::update_many()
            .col_expr(checkout_session::Column::Status, Expr::value(status))
            .col_expr(
                checkout_session::Column::FailureReason,
                Expr::value(reason.map(str::to_string)),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::Open))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            debug!(%session_id, ?status, "no open checkout to close");
            return Ok(());
        }

        let event = match status {
            CheckoutStatus::Expired => Event::CheckoutExpired {
                session_id: session_id.to_string(),
            },
            _ => Event::CheckoutFailed {
                session_id: session_id.to_string(),
                reason: reason.unwrap_or("unknown").to_string(),
            },
        };
        self.event_sender.send_or_log(event).await;
        Ok(())
    }
}

fn parse_object<T>(parsed: Result<T, serde_json::Error>) -> Result<T, ServiceError> {
    parsed.map_err(|e| ServiceError::BadRequest(format!("Malformed webhook object: {}", e)))
}

fn metadata_uuid(session: &CheckoutSessionObject, key: &str) -> Option<Uuid> {
    parse_uuid(&session.metadata, key)
}

fn parse_uuid(metadata: &HashMap<String, String>, key: &str) -> Option<Uuid> {
    metadata.get(key).and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Payment intent id, or the session id for sessions that never got one
fn payment_reference(session: &CheckoutSessionObject) -> String {
    session
        .payment_intent
        .clone()
        .unwrap_or_else(|| session.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(payment_intent: Option<&str>, metadata: &[(&str, &str)]) -> CheckoutSessionObject {
        CheckoutSessionObject {
            id: "cs_test_1".into(),
            payment_status: Some("paid".into()),
            payment_intent: payment_intent.map(str::to_string),
            customer_email: None,
            customer_details: None,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            amount_total: Some(3000),
            currency: Some("usd".into()),
        }
    }

    #[test]
    fn payment_reference_falls_back_to_session_id() {
        assert_eq!(payment_reference(&session(Some("pi_9"), &[])), "pi_9");
        assert_eq!(payment_reference(&session(None, &[])), "cs_test_1");
    }

    #[test]
    fn metadata_ids_must_be_uuids() {
        let user_id = Uuid::new_v4();
        let s = session(None, &[("user_id", &user_id.to_string()), ("cart_id", "nope")]);
        assert_eq!(metadata_uuid(&s, "user_id"), Some(user_id));
        assert_eq!(metadata_uuid(&s, "cart_id"), None);
        assert_eq!(metadata_uuid(&s, "missing"), None);
    }

    #[test]
    fn webhook_errors_map_to_bad_request() {
        let err: ServiceError = WebhookError::MissingSecret.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("not configured"));
    }
}
