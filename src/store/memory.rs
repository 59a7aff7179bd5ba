//! In-process store for tests and local development.
//!
//! All state sits behind one async mutex, so every trait call is atomic with
//! respect to every other call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Applied, CartStore, CouponStore, Deletion, OrderFilter, OrderStore, PaymentChange, ProductStore, StatusChange, StoreError};
use crate::domain::aggregates::{Cart, CartLine, Coupon, Order, OrderStatus, PaymentStatus, ProductSnapshot};
use crate::domain::value_objects::CouponCode;

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, ProductSnapshot>,
    carts: HashMap<Uuid, StoredCart>,
    coupons: HashMap<CouponCode, Coupon>,
    orders: HashMap<Uuid, Order>,
}

struct StoredCart {
    lines: Vec<CartLine>,
    version: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_order_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn upsert_product(&self, product: ProductSnapshot) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn remove_product(&self, product_id: Uuid) {
        self.state.lock().await.products.remove(&product_id);
    }

    /// Makes order writes fail, to exercise rollback paths.
    pub fn fail_order_writes(&self, fail: bool) { self.fail_order_writes.store(fail, Ordering::SeqCst); }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_order_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order writes disabled".into()));
        }
        Ok(())
    }
}

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn snapshot(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>, StoreError> {
        Ok(self.state.lock().await.products.get(&product_id).cloned())
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn load_cart(&self, user_id: Uuid) -> Result<Cart, StoreError> {
        let state = self.state.lock().await;
        Ok(match state.carts.get(&user_id) {
            Some(c) => Cart::restore(user_id, c.lines.clone(), c.version, c.updated_at),
            None => Cart::empty(user_id),
        })
    }

    async fn save_cart(&self, cart: &mut Cart) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let current = state.carts.get(&cart.user_id()).map_or(0, |c| c.version);
        if current != cart.version() { return Err(StoreError::CartChanged); }
        let version = current + 1;
        state.carts.insert(cart.user_id(), StoredCart { lines: cart.lines().to_vec(), version, updated_at: cart.updated_at() });
        cart.mark_saved(version);
        Ok(())
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn find_coupon(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        Ok(self.state.lock().await.coupons.get(code).cloned())
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.coupons.contains_key(&coupon.code) { return Err(StoreError::Duplicate); }
        state.coupons.insert(coupon.code.clone(), coupon.clone());
        Ok(())
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>, StoreError> {
        let mut coupons: Vec<Coupon> = self.state.lock().await.coupons.values().cloned().collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    async fn list_active_coupons(&self, now: DateTime<Utc>) -> Result<Vec<Coupon>, StoreError> {
        Ok(self.list_coupons().await?.into_iter().filter(|c| c.is_active && c.expiry_date >= now).collect())
    }

    async fn disable_coupon(&self, code: &CouponCode) -> Result<Coupon, StoreError> {
        let mut state = self.state.lock().await;
        let coupon = state.coupons.get_mut(code).ok_or(StoreError::NotFound)?;
        coupon.is_active = false;
        Ok(coupon.clone())
    }

    async fn update_coupon(&self, coupon: &Coupon) -> Result<Coupon, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.coupons.get_mut(&coupon.code).ok_or(StoreError::NotFound)?;
        if coupon.usage_limit.is_some_and(|limit| stored.used_count > limit) { return Err(StoreError::LimitBelowUsage); }
        *stored = Coupon { used_count: stored.used_count, created_at: stored.created_at, ..coupon.clone() };
        Ok(stored.clone())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn commit_checkout(&self, order: &Order, cart_version: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        // Every guard is checked before anything is written.
        let current_version = state.carts.get(&order.user_id).map_or(0, |c| c.version);
        if current_version != cart_version { return Err(StoreError::CartChanged); }
        if let Some(code) = &order.coupon_code {
            let coupon = state.coupons.get(code).ok_or(StoreError::CouponExhausted)?;
            if coupon.is_exhausted() { return Err(StoreError::CouponExhausted); }
        }
        self.check_writable()?;
        if state.orders.contains_key(&order.id) { return Err(StoreError::Duplicate); }

        if let Some(coupon) = order.coupon_code.as_ref().and_then(|code| state.coupons.get_mut(code)) {
            coupon.used_count += 1;
        }
        state.carts.insert(order.user_id, StoredCart { lines: vec![], version: current_version + 1, updated_at: order.created_at });
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(newest_first(state.orders.values().filter(|o| o.user_id == user_id).cloned().collect()))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(newest_first(state.orders.values().filter(|o| filter.matches(o)).cloned().collect()))
    }

    async fn transition_payment(&self, order_id: Uuid, change: &PaymentChange) -> Result<Applied<Order>, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id).ok_or(StoreError::NotFound)?;
        if !change.allowed_from.contains(&order.payment_status) {
            return Ok(Applied::Unchanged(order.clone()));
        }
        order.payment_status = change.to;
        if change.payment_ref.is_some() {
            order.payment_provider_ref = change.payment_ref.clone();
        }
        if change.to == PaymentStatus::Paid {
            order.paid_at = Some(change.at);
        }
        Ok(Applied::Changed(order.clone()))
    }

    async fn transition_status(&self, order_id: Uuid, change: &StatusChange) -> Result<Applied<Order>, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id).ok_or(StoreError::NotFound)?;
        if order.order_status != change.from {
            return Ok(Applied::Unchanged(order.clone()));
        }
        order.order_status = change.to;
        if change.to == OrderStatus::Delivered {
            order.delivered_at = Some(change.at);
        }
        Ok(Applied::Changed(order.clone()))
    }

    async fn delete_or_cancel(&self, order_id: Uuid) -> Result<Deletion, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id).ok_or(StoreError::NotFound)?;
        if order.is_paid() {
            order.order_status = OrderStatus::Cancelled;
            return Ok(Deletion::Cancelled(order.clone()));
        }
        state.orders.remove(&order_id);
        Ok(Deletion::Removed)
    }
}
