//! Boutique Checkout Library
//!
//! Carts, hosted checkout sessions, webhook-driven order creation and
//! order notifications for a boutique storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{Extension, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::handlers::{
    carts::carts_routes,
    health::health_routes,
    orders::{admin_orders_routes, orders_routes},
    payment_webhooks::payment_webhook_routes,
    payments::payments_routes,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// HTTP surface without shared layers
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/api/cart", carts_routes())
        .nest(
            "/api/payments",
            payments_routes().merge(payment_webhook_routes()),
        )
        .nest(
            "/api/orders",
            orders_routes().merge(admin_orders_routes()),
        )
        .merge(health_routes())
}

/// Full application router: routes, OpenAPI document, tracing, auth
/// service injection and request ids. Internal error messages are only
/// shown in development.
pub fn app(state: AppState, auth_service: Arc<AuthService>) -> Router {
    let expose_error_details = state.config.is_development();
    api_routes()
        .merge(openapi::swagger_ui())
        .layer(axum::middleware::from_fn_with_state(
            expose_error_details,
            middleware_helpers::error_detail_middleware,
        ))
        .layer(crate::tracing::configure_http_tracing())
        // auth_middleware reads the service from request extensions
        .layer(Extension(auth_service))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
