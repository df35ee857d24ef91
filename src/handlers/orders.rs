use crate::handlers::common::{
    envelope, map_service_error, paginated, validate_input, PaginationMeta, PaginationParams,
};
use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::{ApiError, ErrorResponse},
    services::orders::{OrderDetail, OrderPage, OrderView},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Customer order routes
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .with_auth()
}

/// Admin-only order routes, merged under the same prefix
pub fn admin_orders_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/all", get(list_all_orders))
        .route("/:id/status", put(update_order_status))
        .with_role("admin")
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderEnvelope {
    pub success: bool,
    pub order: OrderDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListEnvelope {
    pub success: bool,
    pub orders: Vec<OrderView>,
    pub pagination: PaginationMeta,
}

fn page_response(page: OrderPage) -> Result<Response, ApiError> {
    let meta = PaginationMeta {
        page: page.page,
        limit: page.limit,
        total: page.total,
        total_pages: page.total_pages,
    };
    paginated("orders", page.orders, meta)
}

/// Caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/orders",
    params(PaginationParams),
    responses((status = 200, description = "Orders page", body = OrderListEnvelope)),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.config.page_size(params.limit);
    let page = state
        .services
        .orders
        .list_orders(user.user_id, params.page(), limit)
        .await
        .map_err(map_service_error)?;

    page_response(page)
}

/// One order with its items
#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = OrderEnvelope),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(user.user_id, order_id, user.is_admin())
        .await
        .map_err(map_service_error)?;

    envelope("order", order)
}

/// Every order, optionally filtered by status
#[utoipa::path(
    get,
    path = "/api/orders/admin/all",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders page", body = OrderListEnvelope),
        (status = 400, description = "Unknown status filter", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.config.page_size(params.limit);
    let page = state
        .services
        .orders
        .list_all_orders(params.page(), limit, params.status.as_deref())
        .await
        .map_err(map_service_error)?;

    page_response(page)
}

/// Move an order to a new status
#[utoipa::path(
    put,
    path = "/api/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Updated order"),
        (status = 400, description = "Invalid status or transition", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let order = state
        .services
        .orders
        .update_order_status(order_id, &payload.status)
        .await
        .map_err(map_service_error)?;

    envelope("order", order)
}
