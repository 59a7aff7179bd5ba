//! Concurrent checkouts against a single-use coupon and a single cart.

mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::task::JoinSet;
use uuid::Uuid;

use common::{checkout_body, coupon_body, TestApp};
use storefront_checkout::domain::value_objects::CouponCode;
use storefront_checkout::store::CouponStore;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_use_coupon_is_used_once() {
    let app = Arc::new(TestApp::new());
    let product = app.product("Rose Quartz", dec!(500), 100, "Gemstones").await;
    let (status, _) = app.admin_call(Method::POST, "/api/v1/coupons", Some(coupon_body("ONCE", None, Some(1)))).await;
    assert_eq!(status, StatusCode::CREATED);

    let mut users = Vec::new();
    for _ in 0..12 {
        let user = Uuid::new_v4();
        let (status, _) = app.call(Method::POST, "/api/v1/cart", Some(user), Some(json!({ "productId": product, "quantity": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
        users.push(user);
    }

    let mut checkouts = JoinSet::new();
    for user in users {
        let app = app.clone();
        checkouts.spawn(async move {
            app.call(Method::POST, "/api/v1/checkout", Some(user), Some(checkout_body(Some("ONCE")))).await
        });
    }

    let mut placed = 0;
    while let Some(joined) = checkouts.join_next().await {
        let (status, body) = joined.unwrap();
        match status {
            StatusCode::CREATED => placed += 1,
            StatusCode::BAD_REQUEST => assert!(body["message"].as_str().unwrap().contains("usage limit exceeded"), "{body}"),
            other => panic!("unexpected status {other}: {body}"),
        }
    }
    assert_eq!(placed, 1);

    let coupon = app.store.find_coupon(&CouponCode::new("ONCE").unwrap()).await.unwrap().unwrap();
    assert_eq!(coupon.used_count, 1);
    assert_eq!(app.notifier.count("placed").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_cart_checks_out_once() {
    let app = Arc::new(TestApp::new());
    let product = app.product("Rose Quartz", dec!(500), 100, "Gemstones").await;
    let user = Uuid::new_v4();
    app.call(Method::POST, "/api/v1/cart", Some(user), Some(json!({ "productId": product, "quantity": 2 }))).await;

    let mut checkouts = JoinSet::new();
    for _ in 0..6 {
        let app = app.clone();
        checkouts.spawn(async move { app.call(Method::POST, "/api/v1/checkout", Some(user), Some(checkout_body(None))).await });
    }

    let mut placed = 0;
    while let Some(joined) = checkouts.join_next().await {
        let (status, body) = joined.unwrap();
        match status {
            StatusCode::CREATED => placed += 1,
            // Lost the version race, or arrived after the cart was cleared.
            StatusCode::CONFLICT | StatusCode::BAD_REQUEST => {}
            other => panic!("unexpected status {other}: {body}"),
        }
    }
    assert_eq!(placed, 1);

    let (_, mine) = app.call(Method::GET, "/api/v1/orders/mine", Some(user), None).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
}
