//! Payment sessions and settlement.
//!
//! Settlement has two entry points, synchronous verification after the
//! shopper returns and the signed webhook. Both end in the same guarded
//! Pending -> Paid update, so whichever lands second is a no-op.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus, TransitionSource};
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::to_minor_units;
use crate::gateway::stripe::parse_event;
use crate::gateway::{is_session_id, GatewayError, GatewayEvent, PaymentGateway, PaymentSession, SessionRequest, WebhookVerifier};
use crate::services::notifier::OrderNotifier;
use crate::services::Caller;
use crate::store::{Applied, PaymentChange, Store, StoreError};
use crate::{CommerceError, Result};

/// Smallest chargeable amount, in minor units (paise).
pub const MIN_PAYABLE_MINOR_UNITS: i64 = 5000;

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    pub client_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Settled(Order),
    AlreadyPaid(Order),
    NotPaid,
}

impl VerifyOutcome {
    pub fn success(&self) -> bool { !matches!(self, Self::NotPaid) }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Settled(_) => "Payment verified and order updated",
            Self::AlreadyPaid(_) => "Payment already verified",
            Self::NotPaid => "Payment not completed yet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Settled(Uuid),
    AlreadySettled(Uuid),
    MarkedFailed(Uuid),
    Ignored(String),
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    verifier: WebhookVerifier,
    notifier: Arc<dyn OrderNotifier>,
    settings: PaymentSettings,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: WebhookVerifier,
        notifier: Arc<dyn OrderNotifier>,
        settings: PaymentSettings,
    ) -> Self {
        Self { store, gateway, verifier, notifier, settings }
    }

    async fn bounded<T>(&self, call: impl Future<Output = std::result::Result<T, GatewayError>>) -> std::result::Result<T, GatewayError> {
        tokio::time::timeout(self.settings.timeout, call).await.map_err(|_| GatewayError::Timeout)?
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Order> {
        self.store.find_order(order_id).await?.ok_or(CommerceError::OrderNotFound)
    }

    /// Opens a hosted session charging exactly the order's final amount.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn create_session(&self, order_id: Uuid, caller: &Caller) -> Result<PaymentSession> {
        let order = self.load_order(order_id).await?;
        caller.authorize(&order)?;
        match order.payment_status {
            PaymentStatus::Paid => return Err(CommerceError::AlreadyPaid),
            PaymentStatus::Failed => return Err(CommerceError::InvalidTransition("Payment for this order has failed".into())),
            PaymentStatus::Pending => {}
        }
        if order.order_status == OrderStatus::Cancelled {
            return Err(CommerceError::InvalidTransition("Order is cancelled".into()));
        }

        let amount_minor = to_minor_units(order.final_amount)
            .ok_or_else(|| CommerceError::Validation("Order total cannot be charged".into()))?;
        if amount_minor < MIN_PAYABLE_MINOR_UNITS {
            return Err(CommerceError::BelowMinimumPayable { minimum: Decimal::from(MIN_PAYABLE_MINOR_UNITS / 100) });
        }

        let request = self.session_request(&order, amount_minor);
        let session = self.bounded(self.gateway.create_session(&request)).await.map_err(|e| {
            error!(order_id = %order.id, error = %e, "payment session creation failed");
            e
        })?;
        info!(order_id = %order.id, session_id = %session.session_id, amount_minor, "payment session created");
        Ok(session)
    }

    fn session_request(&self, order: &Order, amount_minor: i64) -> SessionRequest {
        let (item_name, item_description) = match order.line_items.as_slice() {
            [only] => (only.title.clone(), format!("Quantity: {} | Included Tax & Discounts", only.quantity.value())),
            items => {
                let id = order.id.simple().to_string();
                let name = format!("Payment for Order #{}", id[id.len() - 6..].to_uppercase());
                let description = format!("Included Tax & Discounts | Items: {}", order.item_names().join(", "));
                if description.chars().count() > 500 {
                    (name, format!("Total Items: {} | Included Tax & Discounts", items.len()))
                } else {
                    (name, description)
                }
            }
        };
        let image = order.line_items.first().map(|i| i.image.clone()).filter(|url| url.starts_with("http"));
        let client_url = self.settings.client_url.trim_end_matches('/');

        SessionRequest {
            order_id: order.id,
            amount_minor,
            currency: self.settings.currency.clone(),
            item_name,
            item_description,
            image,
            success_url: format!("{client_url}/order-success/{}?session_id={{CHECKOUT_SESSION_ID}}", order.id),
            cancel_url: format!("{client_url}/cart"),
            metadata: vec![
                ("orderId".into(), order.id.to_string()),
                ("basePrice".into(), order.subtotal.to_string()),
                ("discountAmount".into(), order.discount_amount.to_string()),
                ("gstAmount".into(), order.tax_amount.to_string()),
                ("couponCode".into(), order.coupon_code.as_ref().map_or_else(|| "NONE".to_string(), |c| c.as_str().to_string())),
            ],
        }
    }

    /// Checks a returned session with the gateway and settles the order if
    /// the money has been captured.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn verify(&self, order_id: Uuid, session_id: &str, caller: &Caller) -> Result<VerifyOutcome> {
        if !is_session_id(session_id) {
            return Err(CommerceError::Validation("Invalid payment session id".into()));
        }
        let order = self.load_order(order_id).await?;
        caller.authorize(&order)?;
        if order.is_paid() { return Ok(VerifyOutcome::AlreadyPaid(order)); }

        let session = self.bounded(self.gateway.retrieve_session(session_id)).await?;
        if session.order_ref.as_deref() != Some(order.id.to_string().as_str()) {
            warn!(order_id = %order.id, session_id, "session belongs to another order");
            return Err(CommerceError::SessionMismatch);
        }
        if !session.paid { return Ok(VerifyOutcome::NotPaid); }
        if session.amount_total.is_some_and(|total| Some(total) != to_minor_units(order.final_amount)) {
            warn!(order_id = %order.id, session_id, amount_total = ?session.amount_total, "session amount differs from order total");
            return Err(CommerceError::SessionMismatch);
        }

        match self.settle(order.id, session.payment_ref).await? {
            Applied::Changed(order) => Ok(VerifyOutcome::Settled(order)),
            Applied::Unchanged(order) if order.is_paid() => Ok(VerifyOutcome::AlreadyPaid(order)),
            Applied::Unchanged(order) => {
                warn!(order_id = %order.id, status = order.payment_status.as_str(), "paid session for an order that is not pending");
                Err(CommerceError::InvalidTransition(format!("Order payment is {}", order.payment_status.as_str())))
            }
        }
    }

    /// Verifies the signature over the raw body before anything is decoded.
    #[instrument(skip_all, fields(bytes = payload.len()))]
    pub async fn handle_webhook(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookOutcome> {
        if let Err(e) = self.verifier.verify(payload, signature, Utc::now()) {
            warn!(error = %e, "webhook signature rejected");
            return Err(e.into());
        }
        let event = parse_event(payload).map_err(|e| CommerceError::MalformedPayload(e.to_string()))?;

        match event {
            GatewayEvent::SessionPaid { event_id, order_ref, payment_ref, amount_total } => {
                let Some(order) = self.referenced_order(&event_id, order_ref.as_deref()).await? else {
                    return Ok(WebhookOutcome::Ignored("unknown order".into()));
                };
                if amount_total.is_some_and(|total| Some(total) != to_minor_units(order.final_amount)) {
                    warn!(event_id = %event_id, order_id = %order.id, ?amount_total, "webhook amount differs from order total");
                    return Ok(WebhookOutcome::Ignored("amount mismatch".into()));
                }
                Ok(match self.settle(order.id, payment_ref).await? {
                    Applied::Changed(o) => WebhookOutcome::Settled(o.id),
                    Applied::Unchanged(o) if o.is_paid() => WebhookOutcome::AlreadySettled(o.id),
                    Applied::Unchanged(o) => {
                        warn!(event_id = %event_id, order_id = %o.id, status = o.payment_status.as_str(), "paid event for an order that is not pending");
                        WebhookOutcome::Ignored("order not pending".into())
                    }
                })
            }
            GatewayEvent::PaymentFailed { event_id, order_ref } => {
                let Some(order) = self.referenced_order(&event_id, order_ref.as_deref()).await? else {
                    return Ok(WebhookOutcome::Ignored("unknown order".into()));
                };
                let change = PaymentChange {
                    allowed_from: PaymentStatus::Failed.predecessors(TransitionSource::Gateway),
                    to: PaymentStatus::Failed,
                    payment_ref: None,
                    at: Utc::now(),
                };
                match self.store.transition_payment(order.id, &change).await? {
                    Applied::Changed(o) => {
                        info!(order_id = %o.id, "payment failed");
                        self.notifier.notify(&OrderEvent::PaymentFailed { order_id: o.id }).await;
                        Ok(WebhookOutcome::MarkedFailed(o.id))
                    }
                    Applied::Unchanged(_) => Ok(WebhookOutcome::Ignored("order not pending".into())),
                }
            }
            GatewayEvent::SessionAwaitingPayment { .. } => Ok(WebhookOutcome::Ignored("payment still processing".into())),
            GatewayEvent::Ignored { event_type, .. } => Ok(WebhookOutcome::Ignored(event_type)),
        }
    }

    async fn referenced_order(&self, event_id: &str, order_ref: Option<&str>) -> Result<Option<Order>> {
        let Some(order_id) = order_ref.and_then(|r| Uuid::parse_str(r).ok()) else {
            warn!(event_id, ?order_ref, "webhook event without a usable order reference");
            return Ok(None);
        };
        let order = self.store.find_order(order_id).await?;
        if order.is_none() { warn!(event_id, %order_id, "webhook event for unknown order"); }
        Ok(order)
    }

    /// The one place an order becomes Paid from the gateway side.
    async fn settle(&self, order_id: Uuid, payment_ref: Option<String>) -> Result<Applied<Order>> {
        let change = PaymentChange {
            allowed_from: PaymentStatus::Paid.predecessors(TransitionSource::Gateway),
            to: PaymentStatus::Paid,
            payment_ref,
            at: Utc::now(),
        };
        let applied = match self.store.transition_payment(order_id, &change).await {
            Ok(applied) => applied,
            Err(StoreError::NotFound) => return Err(CommerceError::OrderNotFound),
            Err(e) => {
                error!(%order_id, error = %e, "settlement write failed");
                return Err(e.into());
            }
        };
        if let Applied::Changed(order) = &applied {
            info!(order_id = %order.id, payment_ref = ?order.payment_provider_ref, "order paid");
            self.notifier.notify(&OrderEvent::PaymentSettled {
                order_id: order.id,
                payment_ref: order.payment_provider_ref.clone(),
                previous: PaymentStatus::Pending,
            }).await;
        }
        Ok(applied)
    }
}
