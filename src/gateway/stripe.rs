//! Stripe Checkout Sessions adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{is_session_id, GatewayError, PaymentGateway, PaymentSession, SessionRequest, SessionStatus};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, secret_key: SecretString) -> Self {
        Self { http: reqwest::Client::new(), api_base: api_base.into().trim_end_matches('/').to_string(), secret_key }
    }

    fn sessions_url(&self) -> String { format!("{}/v1/checkout/sessions", self.api_base) }
}

/// Checkout session fields the service reads, from API responses and from
/// webhook `data.object`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: Option<String>,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    pub fn is_paid(&self) -> bool { self.payment_status.as_deref() == Some("paid") }
    pub fn order_ref(&self) -> Option<&str> { self.metadata.get("orderId").map(String::as_str) }

    fn into_status(self) -> SessionStatus {
        SessionStatus {
            paid: self.is_paid(),
            order_ref: self.order_ref().map(str::to_string),
            session_id: self.id,
            payment_ref: self.payment_intent,
            amount_total: self.amount_total,
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope { error: ErrorBody }

#[derive(Deserialize)]
struct ErrorBody { message: Option<String> }

fn session_form(request: &SessionRequest) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("payment_method_types[0]".into(), "card".into()),
        ("client_reference_id".into(), request.order_id.to_string()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), request.currency.clone()),
        ("line_items[0][price_data][unit_amount]".into(), request.amount_minor.to_string()),
        ("line_items[0][price_data][product_data][name]".into(), request.item_name.clone()),
        ("line_items[0][price_data][product_data][description]".into(), request.item_description.clone()),
    ];
    if let Some(image) = &request.image {
        form.push(("line_items[0][price_data][product_data][images][0]".into(), image.clone()));
    }
    form.extend(request.metadata.iter().map(|(k, v)| (format!("metadata[{k}]"), v.clone())));
    form
}

async fn read_session(response: reqwest::Response) -> Result<CheckoutSessionObject, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.json::<ErrorEnvelope>().await.ok().and_then(|e| e.error.message).unwrap_or_else(|| "no error message".to_string());
        return Err(GatewayError::Rejected { status: status.as_u16(), message });
    }
    Ok(response.json::<CheckoutSessionObject>().await?)
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(&self, request: &SessionRequest) -> Result<PaymentSession, GatewayError> {
        debug!(order_id = %request.order_id, amount_minor = request.amount_minor, "creating checkout session");
        let response = self.http.post(self.sessions_url())
            .bearer_auth(self.secret_key.expose_secret())
            .form(&session_form(request))
            .send().await?;
        let session = read_session(response).await?;
        let redirect_url = session.url.ok_or_else(|| GatewayError::Decode("session has no url".into()))?;
        Ok(PaymentSession { session_id: session.id, redirect_url })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError> {
        if !is_session_id(session_id) { return Err(GatewayError::InvalidSessionId); }
        let response = self.http.get(format!("{}/{}", self.sessions_url(), session_id))
            .bearer_auth(self.secret_key.expose_secret())
            .send().await?;
        Ok(read_session(response).await?.into_status())
    }
}

/// A verified webhook event reduced to what reconciliation acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The session's money has been captured.
    SessionPaid { event_id: String, order_ref: Option<String>, payment_ref: Option<String>, amount_total: Option<i64> },
    /// Completed but payment still in flight (delayed methods).
    SessionAwaitingPayment { event_id: String, order_ref: Option<String> },
    PaymentFailed { event_id: String, order_ref: Option<String> },
    Ignored { event_id: String, event_type: String },
}

#[derive(Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData { object: serde_json::Value }

/// Decodes a webhook body. Call only after the signature has been verified.
pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
    let envelope: EventEnvelope = serde_json::from_slice(payload).map_err(|e| GatewayError::Decode(e.to_string()))?;
    let session = || serde_json::from_value::<CheckoutSessionObject>(envelope.data.object.clone()).map_err(|e| GatewayError::Decode(e.to_string()));
    let event_id = envelope.id.clone();
    Ok(match envelope.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let s = session()?;
            let order_ref = s.order_ref().map(str::to_string);
            // async_payment_succeeded always means paid; completed only when the status says so.
            if s.is_paid() || envelope.event_type == "checkout.session.async_payment_succeeded" {
                GatewayEvent::SessionPaid { event_id, order_ref, payment_ref: s.payment_intent, amount_total: s.amount_total }
            } else {
                GatewayEvent::SessionAwaitingPayment { event_id, order_ref }
            }
        }
        "checkout.session.async_payment_failed" => {
            let s = session()?;
            GatewayEvent::PaymentFailed { event_id, order_ref: s.order_ref().map(str::to_string) }
        }
        other => GatewayEvent::Ignored { event_id, event_type: other.to_string() },
    })
}
