//! Application services. Each one owns a slice of the checkout pipeline and
//! talks to persistence only through [`crate::store::Store`].

pub mod carts;
pub mod checkout;
pub mod coupons;
pub mod notifier;
pub mod orders;
pub mod payments;
pub mod pricing;

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::CommerceError;

pub use carts::CartService;
pub use checkout::{CheckoutInput, CheckoutService};
pub use coupons::{CouponPreview, CouponService, CouponUpdate, NewCoupon, PreviewItem, PublicCoupon};
pub use notifier::{NatsNotifier, OrderNotifier, RecordingNotifier, TracingNotifier};
pub use orders::OrderService;
pub use payments::{PaymentService, PaymentSettings, VerifyOutcome, WebhookOutcome, MIN_PAYABLE_MINOR_UNITS};
pub use pricing::PricingEngine;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role { User, Admin }

/// The authenticated caller, as established upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn user(user_id: Uuid) -> Self { Self { user_id, role: Role::User } }
    pub fn admin(user_id: Uuid) -> Self { Self { user_id, role: Role::Admin } }
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }

    /// Owners and administrators may act on an order.
    pub fn authorize(&self, order: &Order) -> Result<(), CommerceError> {
        if self.is_admin() || order.user_id == self.user_id {
            Ok(())
        } else {
            Err(CommerceError::Forbidden("this order belongs to another user".into()))
        }
    }
}
