//! Order history, admin status changes and customer notifications.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::str::FromStr;

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal string")).expect("valid decimal")
}

#[tokio::test]
async fn customers_list_their_own_orders() {
    let app = TestApp::new().await;
    let ada = app.customer().await;
    let bo = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(12.50), 10).await;

    let first = app.place_order(&ada, shirt.id, 1).await;
    let second = app.place_order(&ada, shirt.id, 2).await;
    app.place_order(&bo, shirt.id, 1).await;

    let response = app
        .request(Method::GET, "/api/orders?limit=1", None, Some(&ada.token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["total_pages"], 2);
    assert_eq!(body["pagination"]["limit"], 1);
    let orders = body["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], second.to_string());
    assert_eq!(decimal(&orders[0]["total_amount"]), dec!(25.00));

    let page_two = response_json(
        app.request(
            Method::GET,
            "/api/orders?page=2&limit=1",
            None,
            Some(&ada.token),
        )
        .await,
    )
    .await;
    assert_eq!(page_two["orders"][0]["id"], first.to_string());
}

#[tokio::test]
async fn order_detail_includes_items_and_images() {
    let app = TestApp::new().await;
    let ada = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(12.50), 10).await;
    app.add_image(shirt.id, "https://cdn.shop.test/shirt-back.jpg", 1)
        .await;
    app.add_image(shirt.id, "https://cdn.shop.test/shirt-front.jpg", 0)
        .await;

    let order_id = app.place_order(&ada, shirt.id, 2).await;

    let body = response_json(
        app.request(
            Method::GET,
            &format!("/api/orders/{}", order_id),
            None,
            Some(&ada.token),
        )
        .await,
    )
    .await;
    let item = &body["order"]["items"][0];
    assert_eq!(item["product_id"], shirt.id.to_string());
    assert_eq!(item["quantity"], 2);
    assert_eq!(decimal(&item["price_at_purchase"]), dec!(12.50));
    assert_eq!(decimal(&item["line_total"]), dec!(25.00));
    assert_eq!(item["image_url"], "https://cdn.shop.test/shirt-front.jpg");
}

#[tokio::test]
async fn other_customers_orders_are_hidden() {
    let app = TestApp::new().await;
    let ada = app.customer().await;
    let bo = app.customer().await;
    let admin = app.admin().await;
    let shirt = app.create_product("Linen Shirt", dec!(12.50), 10).await;
    let order_id = app.place_order(&ada, shirt.id, 1).await;
    let uri = format!("/api/orders/{}", order_id);

    let response = app.request(Method::GET, &uri, None, Some(&bo.token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::GET, &uri, None, Some(&admin.token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{}", uuid::Uuid::new_v4()),
            None,
            Some(&ada.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_lists_all_orders_with_a_status_filter() {
    let app = TestApp::new().await;
    let ada = app.customer().await;
    let bo = app.customer().await;
    let admin = app.admin().await;
    let shirt = app.create_product("Linen Shirt", dec!(12.50), 10).await;
    let shipped = app.place_order(&ada, shirt.id, 1).await;
    app.place_order(&bo, shirt.id, 1).await;

    app.request(
        Method::PUT,
        &format!("/api/orders/{}/status", shipped),
        Some(json!({ "status": "shipped" })),
        Some(&admin.token),
    )
    .await;

    let all = response_json(
        app.request(Method::GET, "/api/orders/admin/all", None, Some(&admin.token))
            .await,
    )
    .await;
    assert_eq!(all["pagination"]["total"], 2);

    let filtered = response_json(
        app.request(
            Method::GET,
            "/api/orders/admin/all?status=shipped",
            None,
            Some(&admin.token),
        )
        .await,
    )
    .await;
    assert_eq!(filtered["pagination"]["total"], 1);
    assert_eq!(filtered["orders"][0]["id"], shipped.to_string());

    let response = app
        .request(
            Method::GET,
            "/api/orders/admin/all?status=lost",
            None,
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(Method::GET, "/api/orders/admin/all", None, Some(&ada.token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn status_changes_are_admin_only_and_forward_only() {
    let app = TestApp::new().await;
    let ada = app.customer().await;
    let admin = app.admin().await;
    let shirt = app.create_product("Linen Shirt", dec!(12.50), 10).await;
    let order_id = app.place_order(&ada, shirt.id, 1).await;
    let uri = format!("/api/orders/{}/status", order_id);

    let response = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "status": "shipped" })),
            Some(&ada.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "status": "teleported" })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "status": "shipped" })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["order"]["status"], "shipped");

    let response = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "status": "processing" })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    for status in ["delivered", "cancelled"] {
        let response = app
            .request(
                Method::PUT,
                &uri,
                Some(json!({ "status": status })),
                Some(&admin.token),
            )
            .await;
        if status == "delivered" {
            assert_eq!(response.status(), StatusCode::OK);
        } else {
            // delivered is terminal
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", uuid::Uuid::new_v4()),
            Some(json!({ "status": "shipped" })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shipping_an_order_emails_the_customer() {
    let app = TestApp::new().await;
    app.mock_sendgrid(202).await;
    let ada = app.customer().await;
    let admin = app.admin().await;
    let shirt = app.create_product("Linen Shirt", dec!(12.50), 10).await;
    let order_id = app.place_order(&ada, shirt.id, 1).await;
    app.wait_for_emails(1).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": "shipped" })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let emails = app.wait_for_emails(2).await;
    assert_eq!(emails.len(), 2);
    let update: Value = serde_json::from_slice(&emails[1].body).unwrap();
    assert_eq!(update["personalizations"][0]["to"][0]["email"], ada.email);
    assert!(update["subject"].as_str().unwrap().contains("shipped"));
}

#[tokio::test]
async fn email_failures_never_fail_the_request() {
    let app = TestApp::new().await;
    app.mock_sendgrid(500).await;
    let ada = app.customer().await;
    let admin = app.admin().await;
    let shirt = app.create_product("Linen Shirt", dec!(12.50), 10).await;

    let order_id = app.place_order(&ada, shirt.id, 1).await;
    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": "processing" })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn health_reports_database_status() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert!(body["paths"]["/api/payments/create-checkout-session"].is_object());
}
