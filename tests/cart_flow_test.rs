//! Cart endpoints against a real schema.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal string")).expect("decimal")
}

#[tokio::test]
async fn cart_total_is_sum_of_snapshot_lines() {
    let app = TestApp::new().await;
    let user = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(10.00), 5).await;
    let scarf = app.create_product("Silk Scarf", dec!(12.50), 4).await;
    app.add_image(shirt.id, "https://cdn.test/shirt-back.jpg", 1).await;
    app.add_image(shirt.id, "https://cdn.test/shirt-front.jpg", 0).await;

    assert_eq!(app.add_to_cart(&user, shirt.id, 3).await.status(), StatusCode::OK);
    let response = app.add_to_cart(&user, scarf.id, 2).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(decimal(&body["cart"]["total"]), dec!(55.00));
    assert_eq!(body["cart"]["item_count"], 5);

    let items = body["cart"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    let shirt_line = items
        .iter()
        .find(|i| i["product_id"] == shirt.id.to_string())
        .unwrap();
    assert_eq!(shirt_line["product_name"], "Linen Shirt");
    assert_eq!(shirt_line["image_url"], "https://cdn.test/shirt-front.jpg");
    assert_eq!(decimal(&shirt_line["line_total"]), dec!(30.00));
}

#[tokio::test]
async fn re_adding_keeps_the_original_price_snapshot() {
    let app = TestApp::new().await;
    let user = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(10.00), 5).await;

    app.add_to_cart(&user, shirt.id, 1).await;
    app.set_price(shirt.id, dec!(12.00)).await;
    let response = app.add_to_cart(&user, shirt.id, 2).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    let line = &body["cart"]["items"][0];
    assert_eq!(line["quantity"], 3);
    assert_eq!(decimal(&line["price_at_addition"]), dec!(10.00));
    assert_eq!(decimal(&line["current_price"]), dec!(12.00));
    assert_eq!(decimal(&body["cart"]["total"]), dec!(30.00));
}

#[tokio::test]
async fn add_item_rejects_bad_requests() {
    let app = TestApp::new().await;
    let user = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(10.00), 2).await;

    let zero = app.add_to_cart(&user, shirt.id, 0).await;
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let missing = app.add_to_cart(&user, Uuid::new_v4(), 1).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let too_many = app.add_to_cart(&user, shirt.id, 3).await;
    assert_eq!(too_many.status(), StatusCode::CONFLICT);
    let body = response_json(too_many).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("Linen Shirt"));

    // existing + requested counts against stock
    assert_eq!(app.add_to_cart(&user, shirt.id, 2).await.status(), StatusCode::OK);
    assert_eq!(
        app.add_to_cart(&user, shirt.id, 1).await.status(),
        StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn cart_requires_a_bearer_token() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn update_and_remove_are_scoped_to_the_callers_cart() {
    let app = TestApp::new().await;
    let owner = app.customer().await;
    let stranger = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(10.00), 5).await;

    let body = response_json(app.add_to_cart(&owner, shirt.id, 1).await).await;
    let item_id = body["cart"]["items"][0]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/cart/items/{}", item_id);

    let hijack = app
        .request(Method::PUT, &uri, Some(json!({ "quantity": 2 })), Some(&stranger.token))
        .await;
    assert_eq!(hijack.status(), StatusCode::NOT_FOUND);

    let over = app
        .request(Method::PUT, &uri, Some(json!({ "quantity": 6 })), Some(&owner.token))
        .await;
    assert_eq!(over.status(), StatusCode::CONFLICT);

    let updated = app
        .request(Method::PUT, &uri, Some(json!({ "quantity": 4 })), Some(&owner.token))
        .await;
    assert_eq!(updated.status(), StatusCode::OK);
    let body = response_json(updated).await;
    assert_eq!(body["cart"]["items"][0]["quantity"], 4);

    let removed = app
        .request(Method::DELETE, &uri, None, Some(&owner.token))
        .await;
    assert_eq!(removed.status(), StatusCode::OK);
    let body = response_json(removed).await;
    assert!(body["cart"]["items"].as_array().unwrap().is_empty());

    // removing again is a no-op
    let again = app
        .request(Method::DELETE, &uri, None, Some(&owner.token))
        .await;
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn clear_cart_is_idempotent() {
    let app = TestApp::new().await;
    let user = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(10.00), 5).await;
    app.add_to_cart(&user, shirt.id, 2).await;

    for _ in 0..2 {
        let response = app
            .request(Method::DELETE, "/api/cart", None, Some(&user.token))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let body = response_json(
        app.request(Method::GET, "/api/cart", None, Some(&user.token))
            .await,
    )
    .await;
    assert!(body["cart"]["items"].as_array().unwrap().is_empty());
    assert_eq!(decimal(&body["cart"]["total"]), Decimal::ZERO);
}

#[tokio::test]
async fn validate_reports_empty_cart() {
    let app = TestApp::new().await;
    let user = app.customer().await;

    let response = app
        .request(Method::POST, "/api/cart/validate", None, Some(&user.token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"], json!(["Cart is empty"]));
}

#[tokio::test]
async fn validate_flags_price_drift_and_stock() {
    let app = TestApp::new().await;
    let user = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(10.00), 5).await;
    let scarf = app.create_product("Silk Scarf", dec!(25.00), 3).await;

    app.add_to_cart(&user, shirt.id, 3).await;
    app.add_to_cart(&user, scarf.id, 3).await;
    app.set_price(shirt.id, dec!(12.00)).await;
    app.set_stock(scarf.id, 1).await;

    let body = response_json(
        app.request(Method::POST, "/api/cart/validate", None, Some(&user.token))
            .await,
    )
    .await;
    assert_eq!(body["valid"], false);

    let errors: Vec<String> = serde_json::from_value(body["errors"].clone()).unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.contains("Linen Shirt") && e.contains("Price changed")));
    assert!(errors.iter().any(|e| e.contains("Silk Scarf") && e.contains("1 available")));
}

#[tokio::test]
async fn concurrent_adds_cannot_oversell_the_last_unit() {
    let app = TestApp::new().await;
    let user = app.customer().await;
    let shirt = app.create_product("Linen Shirt", dec!(10.00), 1).await;

    let (first, second) = tokio::join!(
        app.add_to_cart(&user, shirt.id, 1),
        app.add_to_cart(&user, shirt.id, 1)
    );

    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let body = response_json(
        app.request(Method::GET, "/api/cart", None, Some(&user.token))
            .await,
    )
    .await;
    assert_eq!(body["cart"]["items"][0]["quantity"], 1);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/cart", None, None).await;
    let header = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("request id header");

    let body = response_json(response).await;
    assert_eq!(body["request_id"], header);
}
