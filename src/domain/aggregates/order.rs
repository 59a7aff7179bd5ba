//! Order Aggregate
//!
//! An order is written once at checkout and afterwards only changes state.
//! Line items and the shipping address are value snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::coupon::DiscountableLine;
use crate::domain::aggregates::product::ProductSnapshot;
use crate::domain::pricing::PricedOrderDraft;
use crate::domain::value_objects::{CouponCode, Quantity};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLineItem {
    pub product_id: Uuid,
    pub title: String,
    pub unit_price: Decimal,
    pub quantity: Quantity,
    pub image: String,
    pub category: String,
    pub subcategory: Option<String>,
}

impl PricedLineItem {
    pub fn freeze(product: &ProductSnapshot, quantity: Quantity) -> Self {
        Self {
            product_id: product.id, title: product.title.clone(), unit_price: product.price, quantity,
            image: product.primary_image().to_string(), category: product.category.clone(), subcategory: product.subcategory.clone(),
        }
    }
}

impl DiscountableLine for PricedLineItem {
    fn line_total(&self) -> Decimal { self.unit_price * self.quantity.as_decimal() }
    fn category(&self) -> &str { &self.category }
    fn subcategory(&self) -> Option<&str> { self.subcategory.as_deref() }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "fullName is required"))]
    pub full_name: String,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "postalCode is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "country is required"))]
    pub country: String,
    #[validate(length(min = 1, message = "phone is required"))]
    pub phone: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus { #[default] Pending, Paid, Failed }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus { #[default] Processing, Shipped, Delivered, Cancelled }

/// Who is driving a payment status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionSource { Gateway, Administrator }

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 3] = [Self::Pending, Self::Paid, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "Pending", Self::Paid => "Paid", Self::Failed => "Failed" }
    }

    pub fn parse(value: &str) -> Option<Self> { Self::ALL.into_iter().find(|s| s.as_str() == value) }

    /// Pending -> Paid and Pending -> Failed for everyone. Only an
    /// administrator may move Failed -> Paid. Paid is final.
    pub fn can_transition_to(self, next: PaymentStatus, source: TransitionSource) -> bool {
        match (self, next) {
            (Self::Pending, Self::Paid) | (Self::Pending, Self::Failed) => true,
            (Self::Failed, Self::Paid) => source == TransitionSource::Administrator,
            _ => false,
        }
    }

    /// States from which `self` is reachable, for compare-and-set updates.
    pub fn predecessors(self, source: TransitionSource) -> Vec<PaymentStatus> {
        Self::ALL.into_iter().filter(|from| from.can_transition_to(self, source)).collect()
    }
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self { Self::Processing => "Processing", Self::Shipped => "Shipped", Self::Delivered => "Delivered", Self::Cancelled => "Cancelled" }
    }

    pub fn parse(value: &str) -> Option<Self> { Self::ALL.into_iter().find(|s| s.as_str() == value) }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Processing, Self::Shipped) | (Self::Shipped, Self::Delivered) | (Self::Processing | Self::Shipped, Self::Cancelled)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub line_items: Vec<PricedLineItem>,
    pub subtotal: Decimal,
    pub coupon_code: Option<CouponCode>,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub final_amount: Decimal,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub payment_provider_ref: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub order_status: OrderStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Builds the immutable order from a priced draft. The address is copied.
    pub fn place(user_id: Uuid, draft: PricedOrderDraft, shipping_address: ShippingAddress, payment_method: impl Into<String>, now: DateTime<Utc>) -> Result<Self, OrderError> {
        if draft.lines.is_empty() { return Err(OrderError::NoItems); }
        let totals = draft.totals;
        Ok(Self {
            id: Uuid::now_v7(), user_id, line_items: draft.lines, subtotal: totals.subtotal,
            coupon_code: draft.coupon.map(|c| c.code), discount_amount: totals.discount, tax_amount: totals.tax,
            final_amount: totals.final_amount, payment_method: payment_method.into(),
            payment_status: PaymentStatus::Pending, payment_provider_ref: None, paid_at: None,
            order_status: OrderStatus::Processing, delivered_at: None, shipping_address, created_at: now,
        })
    }

    pub fn is_paid(&self) -> bool { self.payment_status == PaymentStatus::Paid }
    pub fn item_names(&self) -> Vec<&str> { self.line_items.iter().map(|i| i.title.as_str()).collect() }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order has no items")]
    NoItems,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pricing::{compute_totals, AppliedCoupon};
    use rust_decimal_macros::dec;

    fn line() -> PricedLineItem {
        PricedLineItem { product_id: Uuid::new_v4(), title: "Rose Quartz".into(), unit_price: dec!(500), quantity: Quantity::new(2).unwrap(), image: String::new(), category: "Gemstones".into(), subcategory: None }
    }

    #[test]
    fn test_order_placed_pending_processing() {
        let draft = PricedOrderDraft {
            lines: vec![line()],
            coupon: Some(AppliedCoupon { code: CouponCode::new("gem10").unwrap(), discount_amount: dec!(100), eligible_amount: dec!(1000) }),
            totals: compute_totals(dec!(1000), dec!(100)),
        };
        let order = Order::place(Uuid::new_v4(), draft, ShippingAddress::default(), "card", Utc::now()).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.order_status, OrderStatus::Processing);
        assert_eq!(order.coupon_code.as_ref().map(|c| c.as_str()), Some("GEM10"));
        assert_eq!(order.final_amount, dec!(1062));
    }

    #[test]
    fn test_order_requires_items() {
        let draft = PricedOrderDraft { lines: vec![], coupon: None, totals: compute_totals(Decimal::ZERO, Decimal::ZERO) };
        assert_eq!(Order::place(Uuid::new_v4(), draft, ShippingAddress::default(), "card", Utc::now()), Err(OrderError::NoItems));
    }

    #[test]
    fn test_payment_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Paid, TransitionSource::Gateway));
        assert!(!Failed.can_transition_to(Paid, TransitionSource::Gateway));
        assert!(Failed.can_transition_to(Paid, TransitionSource::Administrator));
        assert!(!Paid.can_transition_to(Failed, TransitionSource::Administrator));
        assert_eq!(Paid.predecessors(TransitionSource::Gateway), vec![Pending]);
        assert_eq!(Paid.predecessors(TransitionSource::Administrator), vec![Pending, Failed]);
    }

    #[test]
    fn test_order_status_transitions() {
        use OrderStatus::*;
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(!Processing.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Processing));
    }
}
