//! Checkout and payment endpoints.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extract::{ApiJson, AuthUser};
use super::AppState;
use crate::domain::aggregates::Order;
use crate::gateway::PaymentSession;
use crate::services::{CheckoutInput, VerifyOutcome, WebhookOutcome};
use crate::Result;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionRequestBody { pub order_id: Uuid }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyRequestBody { pub order_id: Uuid, pub session_id: String }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

pub async fn checkout(State(s): State<AppState>, AuthUser(caller): AuthUser, ApiJson(r): ApiJson<CheckoutInput>) -> Result<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.checkout.checkout(caller.user_id, r).await?)))
}

pub async fn create_payment_session(State(s): State<AppState>, AuthUser(caller): AuthUser, ApiJson(r): ApiJson<SessionRequestBody>) -> Result<Json<PaymentSession>> {
    Ok(Json(s.payments.create_session(r.order_id, &caller).await?))
}

pub async fn verify_payment(State(s): State<AppState>, AuthUser(caller): AuthUser, ApiJson(r): ApiJson<VerifyRequestBody>) -> Result<Json<VerifyResponse>> {
    let outcome = s.payments.verify(r.order_id, &r.session_id, &caller).await?;
    let (success, message) = (outcome.success(), outcome.message());
    let order = match outcome {
        VerifyOutcome::Settled(o) | VerifyOutcome::AlreadyPaid(o) => Some(o),
        VerifyOutcome::NotPaid => None,
    };
    Ok(Json(VerifyResponse { success, message, order }))
}

/// Takes the body as raw bytes: the signature covers them exactly.
pub async fn payment_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<serde_json::Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = s.payments.handle_webhook(&body, signature).await?;
    let status = match &outcome {
        WebhookOutcome::Settled(_) => "settled",
        WebhookOutcome::AlreadySettled(_) => "already_settled",
        WebhookOutcome::MarkedFailed(_) => "failed",
        WebhookOutcome::Ignored(_) => "ignored",
    };
    Ok(Json(serde_json::json!({ "received": true, "status": status })))
}
