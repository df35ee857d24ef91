use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Boutique Checkout API",
        version = "0.1.0",
        description = r#"
# Boutique Checkout API

Carts, hosted checkout sessions and the orders created from paid checkouts.

## Authentication

Cart, checkout and order endpoints require a bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```

The payment webhook is public and authenticated by its `stripe-signature` header.

## Error Handling

Failures share one envelope:

```json
{
  "success": false,
  "message": "Insufficient stock: Only 2 units of Linen Shirt available",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Payments", description = "Checkout sessions and payment callbacks"),
        (name = "Orders", description = "Order history and fulfillment"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::validate_cart,

        // Payments
        crate::handlers::payments::create_checkout_session,
        crate::handlers::payment_webhooks::payment_webhook,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::update_order_status,

        // Health
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::carts::AddItemRequest,
            crate::handlers::carts::UpdateQuantityRequest,
            crate::handlers::carts::CartEnvelope,
            crate::handlers::carts::CartValidationEnvelope,
            crate::services::commerce::CartView,
            crate::services::commerce::CartItemView,

            crate::handlers::payments::CreateCheckoutSessionRequest,
            crate::services::commerce::CheckoutSessionCreated,

            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::handlers::orders::OrderEnvelope,
            crate::handlers::orders::OrderListEnvelope,
            crate::handlers::common::PaginationMeta,
            crate::services::orders::OrderView,
            crate::services::orders::OrderDetail,
            crate::services::orders::OrderItemView,
            crate::entities::OrderStatus,

            crate::handlers::health::HealthResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url(OPENAPI_JSON_PATH, ApiDocV1::openapi())
}
