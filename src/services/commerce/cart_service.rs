use crate::{
    entities::{
        commerce::{
            cart, cart_item, product_image, Cart, CartItem, CartItemModel, CartModel,
            CheckoutLineItem, ProductImage,
        },
        Product, ProductModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{is_foreign_key_violation, is_unique_violation},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const EMPTY_CART_MESSAGE: &str = "Cart is empty";

/// Cart line joined with the live catalog
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    /// `None` when the product no longer exists
    pub product_name: Option<String>,
    pub image_url: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String, example = "10.00")]
    pub price_at_addition: Decimal,
    #[schema(value_type = Option<String>, example = "12.00")]
    pub current_price: Option<Decimal>,
    pub stock_quantity: Option<i32>,
    #[schema(value_type = String, example = "30.00")]
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub items: Vec<CartItemView>,
    /// Sum of `price_at_addition * quantity`
    #[schema(value_type = String, example = "30.00")]
    pub total: Decimal,
    pub item_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl CartValidation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Cart total from the snapshot prices
pub fn cart_total(items: &[CartItemModel]) -> Decimal {
    items.iter().map(CartItemModel::line_total).sum()
}

type CartLine = (CartItemModel, Option<ProductModel>);

/// Per-user shopping cart backed by `carts` / `cart_items`.
///
/// Every mutation re-reads live stock, and the price snapshot on a line is
/// taken only when the product is first added.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    async fn find_cart<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?)
    }

    /// Returns the user's cart, creating it on first use.
    ///
    /// A concurrent creator losing the race on the unique `user_id` index
    /// re-reads the winner's row.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        if let Some(existing) = Self::find_cart(&*self.db, user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let insert = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match insert {
            Ok(created) => {
                info!(cart_id = %created.id, %user_id, "created cart");
                Ok(created)
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(%user_id, "cart created concurrently, reusing it");
                Self::find_cart(&*self.db, user_id).await?.ok_or_else(|| {
                    ServiceError::InternalError("cart vanished after unique violation".into())
                })
            }
            Err(e) if is_foreign_key_violation(&e) => {
                Err(ServiceError::NotFound(format!("User {} not found", user_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_lines<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<CartLine>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .order_by_asc(cart_item::Column::Id)
            .find_also_related(Product)
            .all(conn)
            .await?)
    }

    /// First image (lowest position) per product
    pub(crate) async fn primary_images(
        &self,
        product_ids: Vec<Uuid>,
    ) -> Result<HashMap<Uuid, String>, ServiceError> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let images = ProductImage::find()
            .filter(product_image::Column::ProductId.is_in(product_ids))
            .order_by_asc(product_image::Column::Position)
            .order_by_asc(product_image::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut primary = HashMap::new();
        for image in images {
            primary.entry(image.product_id).or_insert(image.url);
        }
        Ok(primary)
    }

    /// Returns the cart view with live product data, creating the cart lazily.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create_cart(user_id).await?;
        let lines = Self::load_lines(&*self.db, cart.id).await?;
        let images = self
            .primary_images(lines.iter().map(|(item, _)| item.product_id).collect())
            .await?;

        let items: Vec<CartItemView> = lines
            .iter()
            .map(|(item, product)| CartItemView {
                id: item.id,
                product_id: item.product_id,
                product_name: product.as_ref().map(|p| p.name.clone()),
                image_url: images.get(&item.product_id).cloned(),
                quantity: item.quantity,
                price_at_addition: item.price_at_addition,
                current_price: product.as_ref().map(|p| p.price),
                stock_quantity: product.as_ref().map(|p| p.stock_quantity),
                line_total: item.line_total(),
            })
            .collect();

        let models: Vec<CartItemModel> = lines.into_iter().map(|(item, _)| item).collect();

        Ok(CartView {
            id: cart.id,
            total: cart_total(&models),
            item_count: models.iter().map(|i| i.quantity).sum(),
            items,
        })
    }

    /// Adds `quantity` units of a product, merging with an existing line.
    ///
    /// Stock is checked against the line's resulting quantity. A lost insert
    /// race on `(cart_id, product_id)` is retried once against the row that
    /// won.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidInput(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let cart = self.get_or_create_cart(user_id).await?;

        match self.upsert_line(&cart, product_id, quantity).await {
            Err(ServiceError::DatabaseError(e)) if is_unique_violation(&e) => {
                debug!(%product_id, "cart line inserted concurrently, merging");
                self.upsert_line(&cart, product_id, quantity).await?;
            }
            other => other?,
        }

        self.get_cart(user_id).await
    }

    async fn upsert_line(
        &self,
        cart: &CartModel,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if !product.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "{} is no longer available",
                product.name
            )));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        let current = existing.as_ref().map(|i| i.quantity).unwrap_or(0);
        let requested_total = current
            .checked_add(quantity)
            .ok_or_else(|| ServiceError::InvalidInput("Quantity is too large".to_string()))?;

        if product.stock_quantity < requested_total {
            return Err(insufficient_stock(&product));
        }

        let now = Utc::now();
        match existing {
            Some(item) => {
                // Increment in SQL so concurrent merges cannot overshoot stock
                let result = CartItem::update_many()
                    .col_expr(
                        cart_item::Column::Quantity,
                        Expr::col(cart_item::Column::Quantity).add(quantity),
                    )
                    .col_expr(cart_item::Column::UpdatedAt, Expr::value(now))
                    .filter(cart_item::Column::Id.eq(item.id))
                    .filter(cart_item::Column::Quantity.lte(product.stock_quantity - quantity))
                    .exec(&txn)
                    .await?;

                if result.rows_affected == 0 {
                    return Err(insufficient_stock(&product));
                }
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    price_at_addition: Set(product.price),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        touch_cart(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, %product_id, quantity, "added item to cart");
        Ok(())
    }

    /// Sets a line's quantity; the snapshot price is kept.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidInput(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let not_found = || ServiceError::NotFound("Cart item not found".to_string());
        let cart = Self::find_cart(&*self.db, user_id)
            .await?
            .ok_or_else(not_found)?;

        let item = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&*self.db)
            .await?
            .ok_or_else(not_found)?;

        let product = Product::find_by_id(item.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;

        if product.stock_quantity < quantity {
            return Err(insufficient_stock(&product));
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        touch_cart(&*self.db, cart.id).await?;

        self.get_cart(user_id).await
    }

    /// Removes a line from the caller's cart; absent lines are ignored.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        if let Some(cart) = Self::find_cart(&*self.db, user_id).await? {
            let result = CartItem::delete_many()
                .filter(cart_item::Column::Id.eq(item_id))
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&*self.db)
                .await?;

            if result.rows_affected > 0 {
                touch_cart(&*self.db, cart.id).await?;
            }
        }

        self.get_cart(user_id).await
    }

    /// Deletes every line. Safe to call on an empty or missing cart.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let Some(cart) = Self::find_cart(&*self.db, user_id).await? else {
            return Ok(());
        };

        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            touch_cart(&*self.db, cart.id).await?;
            self.event_sender
                .send_or_log(Event::CartCleared {
                    user_id,
                    cart_id: cart.id,
                })
                .await;
        }

        Ok(())
    }

    /// Checks every line against the live catalog. Read-only.
    #[instrument(skip(self))]
    pub async fn validate_cart(&self, user_id: Uuid) -> Result<CartValidation, ServiceError> {
        let lines = match Self::find_cart(&*self.db, user_id).await? {
            Some(cart) => Self::load_lines(&*self.db, cart.id).await?,
            None => Vec::new(),
        };

        Ok(CartValidation::from_errors(validation_errors(&lines)))
    }

    /// Cart id and the priced lines a checkout session is built from.
    ///
    /// Fails with `CartValidationFailed` on an empty cart, a missing or
    /// inactive product, or short stock. Lines keep their snapshot price.
    pub async fn checkout_snapshot(
        &self,
        user_id: Uuid,
    ) -> Result<(CartModel, Vec<CheckoutLineItem>), ServiceError> {
        let Some(cart) = Self::find_cart(&*self.db, user_id).await? else {
            return Err(ServiceError::CartValidationFailed(vec![
                EMPTY_CART_MESSAGE.to_string(),
            ]));
        };

        let lines = Self::load_lines(&*self.db, cart.id).await?;
        let (blocking, drift): (Vec<_>, Vec<_>) = cart_issues(&lines)
            .into_iter()
            .partition(CartIssue::blocks_checkout);
        if !blocking.is_empty() {
            warn!(%user_id, errors = blocking.len(), "cart failed validation at checkout");
            return Err(ServiceError::CartValidationFailed(
                blocking.into_iter().map(CartIssue::into_message).collect(),
            ));
        }
        if !drift.is_empty() {
            info!(%user_id, lines = drift.len(), "checking out at snapshot prices despite price changes");
        }

        let snapshot = lines
            .into_iter()
            .filter_map(|(item, product)| {
                product.map(|p| CheckoutLineItem {
                    product_id: item.product_id,
                    product_name: p.name,
                    quantity: item.quantity,
                    unit_price: item.price_at_addition,
                })
            })
            .collect();

        Ok((cart, snapshot))
    }

    /// Live lines of a cart priced at their snapshot, for callers that hold
    /// a cart id but no pending checkout.
    pub async fn priced_lines(&self, cart_id: Uuid) -> Result<Vec<CheckoutLineItem>, ServiceError> {
        let lines = Self::load_lines(&*self.db, cart_id).await?;
        Ok(lines
            .into_iter()
            .map(|(item, product)| CheckoutLineItem {
                product_id: item.product_id,
                product_name: product
                    .map(|p| p.name)
                    .unwrap_or_else(|| item.product_id.to_string()),
                quantity: item.quantity,
                unit_price: item.price_at_addition,
            })
            .collect())
    }
}

fn insufficient_stock(product: &ProductModel) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "Only {} units of {} available",
        product.stock_quantity, product.name
    ))
}

async fn touch_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<(), ServiceError> {
    Cart::update_many()
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Problem found on a cart line. Price drift is reported but checkout
/// proceeds at the snapshot price.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CartIssue {
    Blocking(String),
    PriceDrift(String),
}

impl CartIssue {
    fn blocks_checkout(&self) -> bool {
        matches!(self, CartIssue::Blocking(_))
    }

    fn into_message(self) -> String {
        match self {
            CartIssue::Blocking(msg) | CartIssue::PriceDrift(msg) => msg,
        }
    }
}

fn cart_issues(lines: &[CartLine]) -> Vec<CartIssue> {
    if lines.is_empty() {
        return vec![CartIssue::Blocking(EMPTY_CART_MESSAGE.to_string())];
    }

    let mut issues = Vec::new();
    for (item, product) in lines {
        let Some(product) = product else {
            issues.push(CartIssue::Blocking(format!(
                "Product {} no longer exists",
                item.product_id
            )));
            continue;
        };

        if !product.is_active {
            issues.push(CartIssue::Blocking(format!(
                "{} is no longer available",
                product.name
            )));
            continue;
        }

        if product.stock_quantity < item.quantity {
            issues.push(CartIssue::Blocking(format!(
                "Insufficient stock for {}: {} requested, {} available",
                product.name, item.quantity, product.stock_quantity
            )));
        }

        if product.price != item.price_at_addition {
            issues.push(CartIssue::PriceDrift(format!(
                "Price changed for {}: was {}, now {}",
                product.name, item.price_at_addition, product.price
            )));
        }
    }
    issues
}

fn validation_errors(lines: &[CartLine]) -> Vec<String> {
    cart_issues(lines)
        .into_iter()
        .map(CartIssue::into_message)
        .collect()
}
