//! Shared harness: the full router over an in-memory store and a fake gateway.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use storefront_checkout::api::{self, AppState};
use storefront_checkout::domain::aggregates::ProductSnapshot;
use storefront_checkout::gateway::signature::sign;
use storefront_checkout::gateway::{GatewayError, PaymentGateway, PaymentSession, SessionRequest, SessionStatus, WebhookVerifier};
use storefront_checkout::services::{PaymentSettings, RecordingNotifier};
use storefront_checkout::store::MemoryStore;

pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// Records sessions it opens and reports them back as paid.
#[derive(Default)]
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, (Uuid, i64)>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(&self, request: &SessionRequest) -> Result<PaymentSession, GatewayError> {
        let session_id = format!("cs_{}", request.order_id.simple());
        self.sessions.lock().unwrap().insert(session_id.clone(), (request.order_id, request.amount_minor));
        Ok(PaymentSession { redirect_url: format!("https://pay.test/{session_id}"), session_id })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError> {
        let (order_id, amount) = self.sessions.lock().unwrap().get(session_id).copied()
            .ok_or_else(|| GatewayError::Rejected { status: 404, message: "No such checkout session".into() })?;
        Ok(SessionStatus {
            session_id: session_id.to_string(), paid: true, payment_ref: Some(format!("pi_{}", order_id.simple())),
            order_ref: Some(order_id.to_string()), amount_total: Some(amount),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin: Uuid,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let settings = PaymentSettings { currency: "inr".into(), client_url: "http://localhost:3000".into(), timeout: Duration::from_secs(2) };
        let verifier = WebhookVerifier::new(SecretString::from(WEBHOOK_SECRET.to_string()), 300);
        let state = AppState::new(store.clone(), Arc::new(FakeGateway::default()), verifier, notifier.clone(), settings);
        Self { router: api::router(state), store, notifier, admin: Uuid::new_v4() }
    }

    pub async fn product(&self, title: &str, price: Decimal, stock: u32, category: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store.upsert_product(ProductSnapshot {
            id, title: title.into(), price, stock, images: vec![format!("https://cdn.test/{id}.jpg")],
            category: category.into(), subcategory: None,
        }).await;
        id
    }

    pub async fn call(&self, method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        self.call_as(method, uri, user.map(|u| (u, "user")), body).await
    }

    pub async fn admin_call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call_as(method, uri, Some((self.admin, "admin")), body).await
    }

    async fn call_as(&self, method: Method, uri: &str, user: Option<(Uuid, &str)>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = user {
            builder = builder.header("x-user-id", id.to_string()).header("x-user-role", role);
        }
        let request = match body {
            Some(b) => builder.header("content-type", "application/json").body(Body::from(b.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn webhook(&self, payload: &[u8], signature: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::POST).uri("/api/v1/payments/webhook").header("content-type", "application/json");
        if let Some(sig) = signature { builder = builder.header("stripe-signature", sig); }
        self.send(builder.body(Body::from(payload.to_vec())).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Fills the user's cart and checks out, returning the order JSON.
    pub async fn place_order(&self, user: Uuid, product: Uuid, quantity: u32, coupon: Option<&str>) -> Value {
        let (status, _) = self.call(Method::POST, "/api/v1/cart", Some(user), Some(json!({ "productId": product, "quantity": quantity }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, order) = self.call(Method::POST, "/api/v1/checkout", Some(user), Some(checkout_body(coupon))).await;
        assert_eq!(status, StatusCode::CREATED, "{order}");
        order
    }
}

pub fn checkout_body(coupon: Option<&str>) -> Value {
    json!({
        "shippingAddress": {
            "fullName": "Asha Rao", "address": "12 MG Road", "city": "Pune", "state": "MH",
            "postalCode": "411001", "country": "India", "phone": "9999999999"
        },
        "paymentMethod": "card",
        "couponCode": coupon,
    })
}

pub fn coupon_body(code: &str, category: Option<&str>, usage_limit: Option<u32>) -> Value {
    json!({
        "code": code, "discountType": "percentage", "discountValue": "10",
        "expiryDate": (chrono::Utc::now() + chrono::Duration::days(7)).to_rfc3339(),
        "usageLimit": usage_limit, "applicableCategory": category,
    })
}

pub fn paid_event(order_id: &str, amount_total: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_live", "payment_status": "paid", "payment_intent": "pi_live", "amount_total": amount_total,
            "metadata": { "orderId": order_id }
        } }
    })).unwrap()
}

pub fn signed(payload: &[u8]) -> String {
    sign(WEBHOOK_SECRET, payload, chrono::Utc::now().timestamp())
}

pub fn decimal(value: &Value) -> Decimal {
    value.as_str().and_then(|s| s.parse().ok()).unwrap_or_else(|| panic!("not a decimal: {value}"))
}
