#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use boutique_checkout::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{
        commerce::{product_image, CheckoutSession, CheckoutSessionModel},
        product, user, Order, OrderItem, Product, ProductModel, UserRole,
    },
    events::{self, EventSender},
    handlers::AppServices,
    notifications::EmailDispatcher,
    services::payments::{StripeConfig, StripeGateway},
    webhooks::SignatureGenerator,
    AppState,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
const JWT_SECRET: &str =
    "integration_tests_jwt_secret_qwertyuiopasdfghjklzxcvbnm_0123456789_ABCDEFGHIJ";

pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

/// Application backed by a throwaway SQLite file with Stripe and SendGrid
/// replaced by local mock servers.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub auth_service: Arc<AuthService>,
    pub stripe: MockServer,
    pub sendgrid: MockServer,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("checkout.db");

        let stripe = MockServer::start().await;
        let sendgrid = MockServer::start().await;

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe_secret_key = "sk_test_123".to_string();
        cfg.stripe_api_base = stripe.uri();
        cfg.stripe_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.frontend_url = "https://shop.test".to_string();
        cfg.sendgrid_api_key = Some("SG.test".to_string());
        cfg.sendgrid_api_base = sendgrid.uri();
        cfg.email_backoff_base_ms = 1;
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StripeGateway::new(StripeConfig::from(&cfg)).expect("stripe client"));
        let email = Arc::new(EmailDispatcher::from_config(&cfg).expect("email dispatcher"));
        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway,
            email,
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = boutique_checkout::app(state.clone(), auth_service.clone());

        Self {
            router,
            state,
            auth_service,
            stripe,
            sendgrid,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }

    async fn insert_user(&self, role: UserRole) -> TestUser {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", id.simple());
        let now = Utc::now();
        user::ActiveModel {
            id: Set(id),
            email: Set(email.clone()),
            name: Set("Test Shopper".to_string()),
            role: Set(role),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed user");

        let roles: &[&str] = match role {
            UserRole::Admin => &["admin"],
            UserRole::Customer => &["customer"],
        };
        let token = self
            .auth_service
            .issue_token(id, Some(&email), Some("Test Shopper"), roles)
            .expect("issue token");

        TestUser { id, email, token }
    }

    pub async fn customer(&self) -> TestUser {
        self.insert_user(UserRole::Customer).await
    }

    pub async fn admin(&self) -> TestUser {
        self.insert_user(UserRole::Admin).await
    }

    pub async fn create_product(&self, name: &str, price: Decimal, stock: i32) -> ProductModel {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            stock_quantity: Set(stock),
            category: Set(Some("apparel".to_string())),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed product")
    }

    pub async fn add_image(&self, product_id: Uuid, url: &str, position: i32) {
        product_image::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            url: Set(url.to_string()),
            alt_text: Set(None),
            position: Set(position),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed product image");
    }

    pub async fn product(&self, id: Uuid) -> ProductModel {
        Product::find_by_id(id)
            .one(self.db())
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn set_price(&self, id: Uuid, price: Decimal) {
        let mut active: product::ActiveModel = self.product(id).await.into();
        active.price = Set(price);
        active.update(self.db()).await.expect("update price");
    }

    pub async fn set_stock(&self, id: Uuid, stock: i32) {
        let mut active: product::ActiveModel = self.product(id).await.into();
        active.stock_quantity = Set(stock);
        active.update(self.db()).await.expect("update stock");
    }

    pub async fn checkout_session(&self, id: &str) -> Option<CheckoutSessionModel> {
        CheckoutSession::find_by_id(id.to_string())
            .one(self.db())
            .await
            .expect("load checkout session")
    }

    /// Stripe answers every session request with `session_id`
    pub async fn mock_stripe_session(&self, session_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": session_id,
                "object": "checkout.session",
                "url": format!("https://checkout.stripe.test/pay/{}", session_id),
            })))
            .mount(&self.stripe)
            .await;
    }

    /// Answers the next session request only, for tests opening several sessions
    pub async fn mock_stripe_session_once(&self, session_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": session_id,
                "object": "checkout.session",
                "url": format!("https://checkout.stripe.test/pay/{}", session_id),
            })))
            .up_to_n_times(1)
            .mount(&self.stripe)
            .await;
    }

    pub async fn mock_sendgrid(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.sendgrid)
            .await;
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn add_to_cart(&self, user: &TestUser, product_id: Uuid, quantity: i32) -> Response {
        self.request(
            Method::POST,
            "/api/cart/items",
            Some(json!({ "productId": product_id, "quantity": quantity })),
            Some(&user.token),
        )
        .await
    }

    /// Opens a checkout for `user` and returns the session id
    pub async fn start_checkout(&self, user: &TestUser) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/payments/create-checkout-session",
                Some(json!({})),
                Some(&user.token),
            )
            .await;
        assert_eq!(response.status(), 200, "checkout session should open");
        let body = response_json(response).await;
        body["sessionId"].as_str().expect("session id").to_string()
    }

    /// Buys `quantity` of `product_id` through checkout and a paid webhook;
    /// returns the order id
    pub async fn place_order(&self, user: &TestUser, product_id: Uuid, quantity: i32) -> Uuid {
        let session_id = format!("cs_test_{}", Uuid::new_v4().simple());
        self.mock_stripe_session_once(&session_id).await;

        let added = self.add_to_cart(user, product_id, quantity).await;
        assert_eq!(added.status(), 200, "item should be added");
        assert_eq!(self.start_checkout(user).await, session_id);

        let event = checkout_completed_event(
            &session_id,
            &format!("pi_{}", Uuid::new_v4().simple()),
            json!({}),
        );
        assert_eq!(self.deliver_webhook(&event).await.status(), 200);

        self.checkout_session(&session_id)
            .await
            .and_then(|s| s.order_id)
            .expect("order materialized")
    }

    pub async fn order_count(&self) -> u64 {
        Order::find().count(self.db()).await.expect("count orders")
    }

    pub async fn order_item_count(&self) -> u64 {
        OrderItem::find().count(self.db()).await.expect("count order items")
    }

    /// Delivers `event` to the webhook with a valid signature
    pub async fn deliver_webhook(&self, event: &Value) -> Response {
        let payload = serde_json::to_vec(event).expect("serialize event");
        let header = SignatureGenerator::new(WEBHOOK_SECRET)
            .header_value(Utc::now().timestamp(), &payload)
            .expect("sign payload");
        self.deliver_raw_webhook(payload, Some(&header)).await
    }

    pub async fn deliver_raw_webhook(&self, payload: Vec<u8>, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("stripe-signature", sig);
        }
        let request = builder.body(Body::from(payload)).expect("webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook")
    }

    /// Waits for spawned email deliveries to reach the SendGrid mock
    pub async fn wait_for_emails(&self, expected: usize) -> Vec<wiremock::Request> {
        for _ in 0..100 {
            let received = self.sendgrid.received_requests().await.unwrap_or_default();
            if received.len() >= expected {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sendgrid.received_requests().await.unwrap_or_default()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn checkout_completed_event(
    session_id: &str,
    payment_intent: &str,
    metadata: Value,
) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "object": "event",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": "paid",
                "payment_intent": payment_intent,
                "currency": "usd",
                "metadata": metadata,
            }
        }
    })
}

pub fn checkout_event(kind: &str, session_id: &str) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "object": "event",
        "type": kind,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": "unpaid",
                "metadata": {},
            }
        }
    })
}

pub fn payment_intent_failed_event(payment_intent: &str, metadata: Value) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "object": "event",
        "type": "payment_intent.payment_failed",
        "data": {
            "object": {
                "id": payment_intent,
                "object": "payment_intent",
                "metadata": metadata,
                "last_payment_error": { "code": "card_declined" },
            }
        }
    })
}
