//! HTTP surface. Handlers extract, call one service, and map the result.

pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod error;
pub mod extract;
pub mod orders;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::gateway::{PaymentGateway, WebhookVerifier};
use crate::services::{CartService, CheckoutService, CouponService, OrderNotifier, OrderService, PaymentService, PaymentSettings};
use crate::store::Store;

pub const SERVICE_NAME: &str = "storefront-checkout";

#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub coupons: CouponService,
    pub orders: OrderService,
    pub payments: PaymentService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: WebhookVerifier,
        notifier: Arc<dyn OrderNotifier>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            carts: CartService::new(store.clone()),
            checkout: CheckoutService::new(store.clone(), notifier.clone()),
            coupons: CouponService::new(store.clone()),
            orders: OrderService::new(store.clone(), notifier.clone()),
            payments: PaymentService::new(store, gateway, verifier, notifier, settings),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": SERVICE_NAME})) }))
        .route("/api/v1/cart", get(cart::get_cart).post(cart::add_to_cart))
        .route("/api/v1/cart/:product_id", put(cart::set_quantity).delete(cart::remove_from_cart))
        .route("/api/v1/checkout", post(checkout::checkout))
        .route("/api/v1/payments/session", post(checkout::create_payment_session))
        .route("/api/v1/payments/verify", post(checkout::verify_payment))
        .route("/api/v1/payments/webhook", post(checkout::payment_webhook))
        .route("/api/v1/coupons", get(coupons::list_coupons).post(coupons::create_coupon))
        .route("/api/v1/coupons/active", get(coupons::list_active_coupons))
        .route("/api/v1/coupons/apply", post(coupons::apply_coupon))
        .route("/api/v1/coupons/:code", put(coupons::update_coupon).delete(coupons::disable_coupon))
        .route("/api/v1/orders/mine", get(orders::my_orders))
        .route("/api/v1/orders/:id", get(orders::get_order))
        .route("/api/v1/admin/orders", get(orders::list_orders))
        .route("/api/v1/admin/users/:user_id/orders", get(orders::user_orders))
        .route("/api/v1/admin/orders/:id", get(orders::admin_get_order).delete(orders::delete_order))
        .route("/api/v1/admin/orders/:id/status", put(orders::update_order_status))
        .route("/api/v1/admin/orders/:id/payment", put(orders::update_payment_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
