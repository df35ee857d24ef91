use crate::{
    errors::{ErrorResponse, ServiceError},
    AppState,
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Public route; deliveries authenticate with their signature
pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}

// POST /api/payments/webhook
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event received"),
        (status = 400, description = "Invalid signature or payload", body = ErrorResponse),
        (status = 500, description = "Processing failed; the provider will redeliver", body = ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    state.services.webhooks.handle(&body, signature).await?;

    Ok(Json(json!({ "received": true })))
}
