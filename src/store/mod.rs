//! Persistence seams.
//!
//! Every state change an order can undergo after checkout is a single
//! compare-and-set call here, so two writers racing on one order serialize at
//! the store and the loser sees `Applied::Unchanged`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, Coupon, Order, OrderStatus, PaymentStatus, ProductSnapshot};
use crate::domain::value_objects::CouponCode;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Duplicate,
    #[error("coupon usage limit reached")]
    CouponExhausted,
    #[error("usage limit below current usage")]
    LimitBelowUsage,
    #[error("cart changed concurrently")]
    CartChanged,
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of a conditional update. Both arms carry the order as it is now.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<T> {
    Changed(T),
    Unchanged(T),
}

impl<T> Applied<T> {
    pub fn changed(&self) -> bool { matches!(self, Self::Changed(_)) }
    pub fn into_inner(self) -> T { match self { Self::Changed(v) | Self::Unchanged(v) => v } }
}

#[derive(Debug, Clone)]
pub struct PaymentChange {
    /// The update applies only while the order is in one of these states.
    pub allowed_from: Vec<PaymentStatus>,
    pub to: PaymentStatus,
    pub payment_ref: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Deletion {
    Removed,
    Cancelled(Order),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub order_status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.map_or(true, |u| order.user_id == u)
            && self.order_status.map_or(true, |s| order.order_status == s)
            && self.payment_status.map_or(true, |s| order.payment_status == s)
            && self.from.map_or(true, |from| order.created_at >= from)
            && self.to.map_or(true, |to| order.created_at <= to)
    }
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn snapshot(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>, StoreError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns an empty version-0 cart for users without one.
    async fn load_cart(&self, user_id: Uuid) -> Result<Cart, StoreError>;
    /// Saves if the stored version still equals `cart.version()`, then bumps it.
    async fn save_cart(&self, cart: &mut Cart) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_coupon(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError>;
    async fn insert_coupon(&self, coupon: &Coupon) -> Result<(), StoreError>;
    async fn list_coupons(&self) -> Result<Vec<Coupon>, StoreError>;
    async fn list_active_coupons(&self, now: DateTime<Utc>) -> Result<Vec<Coupon>, StoreError>;
    async fn disable_coupon(&self, code: &CouponCode) -> Result<Coupon, StoreError>;
    /// Overwrites the editable fields. `used_count` and `created_at` keep their
    /// stored values; fails with `LimitBelowUsage` if the new limit is already
    /// exceeded.
    async fn update_coupon(&self, coupon: &Coupon) -> Result<Coupon, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// One atomic unit: insert the order, clear the user's cart if it is still
    /// at `cart_version`, and increment the order's coupon if it is under its
    /// limit. Any failed guard leaves nothing written.
    async fn commit_checkout(&self, order: &Order, cart_version: i64) -> Result<(), StoreError>;
    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;
    async fn transition_payment(&self, order_id: Uuid, change: &PaymentChange) -> Result<Applied<Order>, StoreError>;
    async fn transition_status(&self, order_id: Uuid, change: &StatusChange) -> Result<Applied<Order>, StoreError>;
    /// Removes an unpaid order or cancels a paid one, decided atomically.
    async fn delete_or_cancel(&self, order_id: Uuid) -> Result<Deletion, StoreError>;
}

/// Everything the services need from persistence.
pub trait Store: ProductStore + CartStore + CouponStore + OrderStore {}

impl<T: ProductStore + CartStore + CouponStore + OrderStore> Store for T {}
