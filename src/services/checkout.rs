//! Checkout Orchestrator: cart to persisted order in one commit.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{CouponRejection, Order, ShippingAddress};
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::CouponCode;
use crate::services::notifier::OrderNotifier;
use crate::services::pricing::PricingEngine;
use crate::store::{Store, StoreError};
use crate::{CommerceError, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckoutInput {
    #[validate]
    pub shipping_address: ShippingAddress,
    #[validate(length(min = 1, message = "paymentMethod is required"))]
    pub payment_method: String,
    /// Blank means no coupon.
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn Store>,
    pricing: PricingEngine,
    notifier: Arc<dyn OrderNotifier>,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn OrderNotifier>) -> Self {
        Self { pricing: PricingEngine::new(store.clone()), store, notifier }
    }

    /// Prices the caller's cart and writes the order, clears the cart and
    /// counts the coupon use in one store call. Nothing is persisted on error.
    #[instrument(skip(self, input), fields(coupon = ?input.coupon_code))]
    pub async fn checkout(&self, user_id: Uuid, input: CheckoutInput) -> Result<Order> {
        input.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;

        let coupon_code = input.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty())
            .map(|c| CouponCode::new(c).map_err(|_| CommerceError::coupon(c, CouponRejection::Unknown)))
            .transpose()?;

        let cart = self.store.load_cart(user_id).await?;
        let draft = self.pricing.price(&cart, coupon_code.as_ref(), Utc::now()).await?;
        let order = Order::place(user_id, draft, input.shipping_address, input.payment_method, Utc::now())
            .map_err(|_| CommerceError::EmptyCart)?;

        match self.store.commit_checkout(&order, cart.version()).await {
            Ok(()) => {}
            Err(StoreError::CouponExhausted) => {
                warn!(order_id = %order.id, "coupon used up while checking out");
                let code = order.coupon_code.as_ref().map(|c| c.as_str().to_string()).unwrap_or_default();
                return Err(CommerceError::coupon(code, CouponRejection::UsageLimitExceeded));
            }
            Err(StoreError::CartChanged) => {
                warn!(order_id = %order.id, "cart changed while checking out");
                return Err(CommerceError::CartChanged);
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "checkout commit failed");
                return Err(e.into());
            }
        }

        info!(order_id = %order.id, final_amount = %order.final_amount, "order placed");
        self.notifier.notify(&OrderEvent::Placed {
            order_id: order.id,
            user_id,
            final_amount: order.final_amount,
            coupon_code: order.coupon_code.as_ref().map(|c| c.as_str().to_string()),
        }).await;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Coupon, DiscountType, OrderStatus, PaymentStatus, ProductSnapshot};
    use crate::domain::value_objects::Quantity;
    use crate::services::notifier::RecordingNotifier;
    use crate::store::{CartStore, CouponStore, MemoryStore, OrderStore};
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Asha Rao".into(), address: "12 MG Road".into(), city: "Pune".into(), state: "MH".into(),
            postal_code: "411001".into(), country: "India".into(), phone: "9999999999".into(),
        }
    }

    fn input(coupon: Option<&str>) -> CheckoutInput {
        CheckoutInput { shipping_address: address(), payment_method: "card".into(), coupon_code: coupon.map(str::to_string) }
    }

    async fn seeded(stock: u32) -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let product = ProductSnapshot { id: Uuid::new_v4(), title: "Rose Quartz".into(), price: dec!(500), stock, images: vec![], category: "Gemstones".into(), subcategory: None };
        store.upsert_product(product.clone()).await;
        let user = Uuid::new_v4();
        let mut cart = store.load_cart(user).await.unwrap();
        cart.add_line(product.id, Quantity::new(2).unwrap());
        store.save_cart(&mut cart).await.unwrap();
        (store, user)
    }

    async fn add_coupon(store: &MemoryStore, usage_limit: Option<u32>) {
        store.insert_coupon(&Coupon {
            code: CouponCode::new("GEM10").unwrap(), discount_type: DiscountType::Percentage, discount_value: dec!(10),
            min_order_amount: Decimal::ZERO, max_discount_amount: None, expiry_date: Utc::now() + Duration::days(1),
            is_active: true, usage_limit, used_count: 0, applicable_category: Some("Gemstones".into()),
            applicable_subcategory: None, created_at: Utc::now(),
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_checkout_commits_everything() {
        let (store, user) = seeded(5).await;
        add_coupon(&store, Some(5)).await;
        let notifier = Arc::new(RecordingNotifier::new());
        let service = CheckoutService::new(store.clone(), notifier.clone());

        let order = service.checkout(user, input(Some("gem10"))).await.unwrap();
        assert_eq!(order.final_amount, dec!(1062));
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.order_status, OrderStatus::Processing);
        assert_eq!(order.shipping_address, address());

        assert!(store.load_cart(user).await.unwrap().is_empty());
        assert_eq!(store.find_coupon(&CouponCode::new("GEM10").unwrap()).await.unwrap().unwrap().used_count, 1);
        assert_eq!(notifier.count("placed").await, 1);
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = CheckoutService::new(store, Arc::new(RecordingNotifier::new()));
        assert!(matches!(service.checkout(Uuid::new_v4(), input(None)).await, Err(CommerceError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_trace() {
        let (store, user) = seeded(5).await;
        add_coupon(&store, Some(5)).await;
        store.fail_order_writes(true);
        let service = CheckoutService::new(store.clone(), Arc::new(RecordingNotifier::new()));

        assert!(matches!(service.checkout(user, input(Some("GEM10"))).await, Err(CommerceError::Storage(_))));
        assert_eq!(store.load_cart(user).await.unwrap().lines().len(), 1);
        assert_eq!(store.find_coupon(&CouponCode::new("GEM10").unwrap()).await.unwrap().unwrap().used_count, 0);
        assert!(store.orders_for_user(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_address_field() {
        let (store, user) = seeded(5).await;
        let service = CheckoutService::new(store, Arc::new(RecordingNotifier::new()));
        let mut bad = input(None);
        bad.shipping_address.city.clear();
        let err = service.checkout(user, bad).await.unwrap_err();
        assert!(matches!(err, CommerceError::Validation(_)));
    }
}
