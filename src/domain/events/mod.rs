//! Domain events
//!
//! Raised only when a state change actually happened, so consumers can treat
//! each event as a one-time side effect trigger.
use crate::domain::aggregates::{OrderStatus, PaymentStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, user_id: Uuid, final_amount: Decimal, coupon_code: Option<String> },
    PaymentSettled { order_id: Uuid, payment_ref: Option<String>, previous: PaymentStatus },
    PaymentFailed { order_id: Uuid },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    Cancelled { order_id: Uuid, was_paid: bool },
    /// An unpaid order deleted outright. Nothing remains on record.
    Removed { order_id: Uuid },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Placed { order_id, .. }
            | Self::PaymentSettled { order_id, .. }
            | Self::PaymentFailed { order_id }
            | Self::StatusChanged { order_id, .. }
            | Self::Cancelled { order_id, .. }
            | Self::Removed { order_id } => *order_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "placed",
            Self::PaymentSettled { .. } => "payment_settled",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::StatusChanged { .. } => "status_changed",
            Self::Cancelled { .. } => "cancelled",
            Self::Removed { .. } => "removed",
        }
    }
}
