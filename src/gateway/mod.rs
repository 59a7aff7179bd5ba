//! Payment gateway boundary.
//!
//! The service only needs two calls from a provider: open a hosted payment
//! session for an exact amount, and read a session back. Webhook signature
//! checking and event decoding live next to the provider they belong to.

pub mod signature;
pub mod stripe;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

pub use signature::{SignatureError, WebhookVerifier};
pub use stripe::{GatewayEvent, StripeGateway};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway timed out")]
    Timeout,
    #[error("payment gateway unreachable: {0}")]
    Transport(String),
    #[error("payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected payment gateway payload: {0}")]
    Decode(String),
    #[error("malformed checkout session id")]
    InvalidSessionId,
}

/// Checkout session ids are `cs_` followed by ASCII letters, digits and `_`.
/// Anything else never reaches a gateway URL.
pub fn is_session_id(id: &str) -> bool {
    id.strip_prefix("cs_")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'))
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { Self::Timeout } else if err.is_decode() { Self::Decode(err.to_string()) } else { Self::Transport(err.to_string()) }
    }
}

/// What to charge. `amount_minor` is the order's final amount in minor units.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub order_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub item_name: String,
    pub item_description: String,
    pub image: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// A session as reported back by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: String,
    pub paid: bool,
    pub payment_ref: Option<String>,
    pub order_ref: Option<String>,
    pub amount_total: Option<i64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<PaymentSession, GatewayError>;
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError>;
}
