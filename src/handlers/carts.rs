use crate::handlers::common::{envelope, map_service_error, success_response};
use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::{ApiError, ErrorResponse},
    services::commerce::{CartValidation, CartView},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

/// Cart endpoints; every route acts on the caller's own cart
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/:id", put(update_item).delete(remove_item))
        .route("/validate", post(validate_cart))
        .with_auth()
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    #[serde(alias = "product_id")]
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartEnvelope {
    pub success: bool,
    pub cart: CartView,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartValidationEnvelope {
    pub success: bool,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Current cart with live catalog data
#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Caller's cart", body = CartEnvelope),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    envelope("cart", cart)
}

/// Add a product, or increase the quantity of a product already present
#[utoipa::path(
    post,
    path = "/api/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartEnvelope),
        (status = 400, description = "Invalid quantity or inactive product", body = ErrorResponse),
        (status = 404, description = "Product not found", body = ErrorResponse),
        (status = 409, description = "Insufficient stock", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .add_item(user.user_id, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    envelope("cart", cart)
}

/// Set the quantity of a cart line
#[utoipa::path(
    put,
    path = "/api/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item id")),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartEnvelope),
        (status = 400, description = "Invalid quantity", body = ErrorResponse),
        (status = 404, description = "Item not in cart", body = ErrorResponse),
        (status = 409, description = "Insufficient stock", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .update_item(user.user_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    envelope("cart", cart)
}

/// Remove a cart line; removing a missing line is a no-op
#[utoipa::path(
    delete,
    path = "/api/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item id")),
    responses((status = 200, description = "Updated cart", body = CartEnvelope)),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_item(user.user_id, item_id)
        .await
        .map_err(map_service_error)?;

    envelope("cart", cart)
}

/// Remove every line from the cart
#[utoipa::path(
    delete,
    path = "/api/cart",
    responses((status = 200, description = "Cart cleared")),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .clear_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(json!({
        "success": true,
        "message": "Cart cleared"
    })))
}

/// Check the cart against live prices and stock
#[utoipa::path(
    post,
    path = "/api/cart/validate",
    responses((status = 200, description = "Validation result", body = CartValidationEnvelope)),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn validate_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let CartValidation { valid, errors } = state
        .services
        .cart
        .validate_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartValidationEnvelope {
        success: true,
        valid,
        errors,
    }))
}
