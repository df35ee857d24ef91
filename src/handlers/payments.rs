use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::{ApiError, ErrorResponse},
    services::commerce::{CheckoutSessionCreated, StartCheckout},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .with_auth()
}

#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutSessionRequest {
    #[validate(url)]
    pub success_url: Option<String>,
    #[validate(url)]
    pub cancel_url: Option<String>,
}

/// Open a hosted checkout session for the caller's cart
#[utoipa::path(
    post,
    path = "/api/payments/create-checkout-session",
    request_body = CreateCheckoutSessionRequest,
    responses(
        (status = 200, description = "Session opened", body = CheckoutSessionCreated),
        (status = 400, description = "Cart empty or invalid", body = ErrorResponse),
        (status = 502, description = "Payment provider rejected the session", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Option<Json<CreateCheckoutSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    validate_input(&payload)?;

    let session = state
        .services
        .checkout
        .create_checkout_session(StartCheckout {
            user_id: user.user_id,
            customer_email: user.email.clone(),
            success_url: payload.success_url,
            cancel_url: payload.cancel_url,
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(session))
}
