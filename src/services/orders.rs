use crate::{
    entities::{
        commerce::{checkout_session, CheckoutLineItem, CheckoutSession, CheckoutStatus},
        order, order_item, product, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus,
        Product, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::templates::{self, OrderNotifier},
    services::{commerce::CartService, is_unique_violation},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub price_at_purchase: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_intent_id: String,
    pub checkout_session_id: Option<String>,
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderModel> for OrderView {
    fn from(order: OrderModel) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            total_amount: order.total_amount,
            currency: order.currency,
            payment_intent_id: order.payment_intent_id,
            checkout_session_id: order.checkout_session_id,
            customer_email: order.customer_email,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Order with its purchased lines
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderView,
    pub items: Vec<OrderItemView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderPage {
    pub orders: Vec<OrderView>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

/// Everything needed to turn a paid checkout into an order
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub payment_intent_id: String,
    pub checkout_session_id: Option<String>,
    /// Pending checkout closed in the same transaction, if one exists
    pub pending_checkout: Option<String>,
    pub customer_email: Option<String>,
    pub currency: String,
    pub items: Vec<CheckoutLineItem>,
}

impl NewOrder {
    pub fn total(&self) -> Decimal {
        self.items.iter().map(CheckoutLineItem::line_total).sum()
    }
}

#[derive(Debug, Clone)]
pub enum MaterializeOutcome {
    Created(OrderModel),
    /// A previous delivery already produced this order
    AlreadyProcessed(OrderModel),
    /// Nothing to create; the reason is logged by the caller
    Skipped(String),
}

/// Creates orders from paid checkouts and serves order queries.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    cart_service: Arc<CartService>,
    notifier: OrderNotifier,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        cart_service: Arc<CartService>,
        notifier: OrderNotifier,
    ) -> Self {
        Self {
            db,
            event_sender,
            cart_service,
            notifier,
        }
    }

    /// Inserts the order, its lines and the stock decrements in one
    /// transaction. Any decrement that would take stock below zero rolls
    /// the whole order back.
    #[instrument(skip(self, new_order), fields(user_id = %new_order.user_id, payment_intent = %new_order.payment_intent_id))]
    pub async fn materialize_order(
        &self,
        new_order: NewOrder,
    ) -> Result<MaterializeOutcome, ServiceError> {
        if new_order.items.is_empty() {
            return Ok(MaterializeOutcome::Skipped(format!(
                "no line items for payment {}",
                new_order.payment_intent_id
            )));
        }

        if new_order.pending_checkout.is_none() {
            if let Some(existing) = self
                .find_by_payment_intent(&new_order.payment_intent_id)
                .await?
            {
                return Ok(MaterializeOutcome::AlreadyProcessed(existing));
            }
        }

        let txn = self.db.begin().await?;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        if let Some(session_id) = &new_order.pending_checkout {
            let claimed = CheckoutSession::update_many()
                .col_expr(
                    checkout_session::Column::Status,
                    Expr::value(CheckoutStatus::Completed),
                )
                .col_expr(checkout_session::Column::OrderId, Expr::value(order_id))
                .col_expr(
                    checkout_session::Column::PaymentIntentId,
                    Expr::value(new_order.payment_intent_id.clone()),
                )
                .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
                .filter(checkout_session::Column::Id.eq(session_id.as_str()))
                .filter(checkout_session::Column::Status.eq(CheckoutStatus::Open))
                .exec(&txn)
                .await?;

            if claimed.rows_affected == 0 {
                drop(txn);
                return self.closed_checkout_outcome(session_id).await;
            }
        }

        let inserted = match Self::insert_order(&txn, order_id, &new_order, now).await {
            Ok(inserted) => inserted,
            Err(ServiceError::DatabaseError(e)) if is_unique_violation(&e) => {
                drop(txn);
                warn!("order for this payment already exists");
                return match self
                    .find_by_payment_intent(&new_order.payment_intent_id)
                    .await?
                {
                    Some(existing) => Ok(MaterializeOutcome::AlreadyProcessed(existing)),
                    None => Err(ServiceError::DatabaseError(e)),
                };
            }
            Err(e) => return Err(e),
        };

        txn.commit().await?;

        let (order, items) = inserted;
        info!(order_id = %order.id, total = %order.total_amount, "order materialized");
        self.after_order_created(&order, &items).await;
        Ok(MaterializeOutcome::Created(order))
    }

    async fn insert_order(
        txn: &DatabaseTransaction,
        order_id: Uuid,
        new_order: &NewOrder,
        now: DateTime<Utc>,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(new_order.user_id),
            payment_intent_id: Set(new_order.payment_intent_id.clone()),
            checkout_session_id: Set(new_order.checkout_session_id.clone()),
            total_amount: Set(new_order.total()),
            currency: Set(new_order.currency.clone()),
            status: Set(OrderStatus::Pending),
            shipping_address_id: Set(None),
            customer_email: Set(new_order.customer_email.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        let mut items = Vec::with_capacity(new_order.items.len());
        for line in &new_order.items {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                price_at_purchase: Set(line.unit_price),
                created_at: Set(now),
            }
            .insert(txn)
            .await?;

            let decremented = Product::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(line.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(line.product_id))
                .filter(product::Column::StockQuantity.gte(line.quantity))
                .exec(txn)
                .await?;

            if decremented.rows_affected == 0 {
                warn!(product_id = %line.product_id, quantity = line.quantity, "stock decrement refused");
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for {}",
                    line.product_name
                )));
            }

            items.push(item);
        }

        Ok((order, items))
    }

    async fn closed_checkout_outcome(
        &self,
        session_id: &str,
    ) -> Result<MaterializeOutcome, ServiceError> {
        let Some(session) = CheckoutSession::find_by_id(session_id.to_string())
            .one(&*self.db)
            .await?
        else {
            return Ok(MaterializeOutcome::Skipped(format!(
                "checkout {} disappeared",
                session_id
            )));
        };

        if let Some(order_id) = session.order_id {
            if let Some(order) = Order::find_by_id(order_id).one(&*self.db).await? {
                return Ok(MaterializeOutcome::AlreadyProcessed(order));
            }
        }

        Ok(MaterializeOutcome::Skipped(format!(
            "checkout {} is already {:?}",
            session_id, session.status
        )))
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?)
    }

    async fn recipient(&self, order: &OrderModel) -> Option<String> {
        if let Some(email) = order.customer_email.clone().filter(|e| !e.is_empty()) {
            return Some(email);
        }
        match User::find_by_id(order.user_id).one(&*self.db).await {
            Ok(user) => user.map(|u| u.email),
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "could not look up order recipient");
                None
            }
        }
    }

    async fn after_order_created(&self, order: &OrderModel, items: &[OrderItemModel]) {
        if let Err(e) = self.cart_service.clear_cart(order.user_id).await {
            error!(order_id = %order.id, error = %e, "failed to clear cart after order");
        }

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                user_id: order.user_id,
                total: order.total_amount,
                created_at: order.created_at,
            })
            .await;

        match self.recipient(order).await {
            Some(to) => {
                self.notifier
                    .dispatch(templates::order_confirmation(&to, order, items));
            }
            None => warn!(order_id = %order.id, "no recipient for order confirmation"),
        }
    }

    /// Caller's orders, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let query = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt);
        self.paginate(query, page, limit).await
    }

    /// Every order, optionally filtered by status
    #[instrument(skip(self))]
    pub async fn list_all_orders(
        &self,
        page: u64,
        limit: u64,
        status: Option<&str>,
    ) -> Result<OrderPage, ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(raw) = status.filter(|s| !s.trim().is_empty()) {
            let status: OrderStatus = raw.parse().map_err(ServiceError::InvalidStatus)?;
            query = query.filter(order::Column::Status.eq(status));
        }
        self.paginate(query, page, limit).await
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<Order>,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.max(1);
        let limit = limit.max(1);
        let paginator = query.paginate(&*self.db, limit);
        let counts = paginator.num_items_and_pages().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders: orders.into_iter().map(OrderView::from).collect(),
            page,
            limit,
            total: counts.number_of_items,
            total_pages: counts.number_of_pages,
        })
    }

    /// Order with items. Orders owned by someone else look missing unless
    /// the caller is an admin.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        is_admin: bool,
    ) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| is_admin || o.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let images = self
            .cart_service
            .primary_images(items.iter().map(|i| i.product_id).collect())
            .await?;

        let items = items
            .into_iter()
            .map(|item| OrderItemView {
                id: item.id,
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                price_at_purchase: item.price_at_purchase,
                line_total: item.line_total(),
                image_url: images.get(&item.product_id).cloned(),
            })
            .collect();

        Ok(OrderDetail {
            order: order.into(),
            items,
        })
    }

    /// Moves an order along its lifecycle and notifies the customer.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        status: &str,
    ) -> Result<OrderView, ServiceError> {
        let next: OrderStatus = status.parse().map_err(ServiceError::InvalidStatus)?;

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let current = order.status;
        if current.is_terminal() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is {} and can no longer change",
                order_id, current
            )));
        }
        if !current.can_transition_to(next) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot move order from {} to {}",
                current, next
            )));
        }

        let updated = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current))
            .exec(&*self.db)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently",
                order_id
            )));
        }

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        info!(%order_id, from = %current, to = %next, "order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: current.to_string(),
                new_status: next.to_string(),
            })
            .await;

        if next.notifies_customer() {
            match self.recipient(&order).await {
                Some(to) => {
                    self.notifier.dispatch(templates::status_update(&to, &order));
                }
                None => warn!(%order_id, "no recipient for status update"),
            }
        }

        Ok(order.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_order_total_sums_snapshot_lines() {
        let line = |quantity, unit_price| CheckoutLineItem {
            product_id: Uuid::new_v4(),
            product_name: "Linen Shirt".into(),
            quantity,
            unit_price,
        };
        let new_order = NewOrder {
            user_id: Uuid::new_v4(),
            payment_intent_id: "pi_1".into(),
            checkout_session_id: None,
            pending_checkout: None,
            customer_email: None,
            currency: "usd".into(),
            items: vec![line(3, dec!(10.00)), line(1, dec!(12.50))],
        };

        assert_eq!(new_order.total(), dec!(42.50));
    }

    #[test]
    fn order_detail_flattens_order_fields() {
        let now = Utc::now();
        let detail = OrderDetail {
            order: OrderView {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                status: OrderStatus::Pending,
                total_amount: dec!(30.00),
                currency: "usd".into(),
                payment_intent_id: "pi_1".into(),
                checkout_session_id: Some("cs_1".into()),
                customer_email: None,
                created_at: now,
                updated_at: now,
            },
            items: Vec::new(),
        };

        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["payment_intent_id"], "pi_1");
        assert!(json["items"].as_array().unwrap().is_empty());
    }
}
