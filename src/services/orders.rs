//! Order reads and the administrative side of the lifecycle.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus, TransitionSource};
use crate::domain::events::OrderEvent;
use crate::services::notifier::OrderNotifier;
use crate::services::Caller;
use crate::store::{Applied, Deletion, OrderFilter, PaymentChange, StatusChange, Store, StoreError};
use crate::{CommerceError, Result};

fn not_found(e: StoreError) -> CommerceError {
    match e {
        StoreError::NotFound => CommerceError::OrderNotFound,
        other => other.into(),
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn OrderNotifier>,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn OrderNotifier>) -> Self { Self { store, notifier } }

    async fn load(&self, order_id: Uuid) -> Result<Order> {
        self.store.find_order(order_id).await?.ok_or(CommerceError::OrderNotFound)
    }

    pub async fn get(&self, order_id: Uuid, caller: &Caller) -> Result<Order> {
        let order = self.load(order_id).await?;
        caller.authorize(&order)?;
        Ok(order)
    }

    pub async fn mine(&self, user_id: Uuid) -> Result<Vec<Order>> {
        Ok(self.store.orders_for_user(user_id).await?)
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(filter).await?)
    }

    /// Setting the current status again succeeds without writing.
    #[instrument(skip(self), fields(to = to.as_str()))]
    pub async fn update_status(&self, order_id: Uuid, to: OrderStatus) -> Result<Order> {
        let order = self.load(order_id).await?;
        let from = order.order_status;
        if from == to { return Ok(order); }
        if !from.can_transition_to(to) {
            return Err(CommerceError::InvalidTransition(format!("Cannot change order status from {} to {}", from.as_str(), to.as_str())));
        }

        let change = StatusChange { from, to, at: Utc::now() };
        match self.store.transition_status(order_id, &change).await.map_err(not_found)? {
            Applied::Changed(order) => {
                info!(order_id = %order.id, from = from.as_str(), "order status changed");
                self.notifier.notify(&OrderEvent::StatusChanged { order_id: order.id, from, to }).await;
                if to == OrderStatus::Cancelled {
                    if order.is_paid() { warn!(order_id = %order.id, "paid order cancelled, refund is handled outside this service"); }
                    self.notifier.notify(&OrderEvent::Cancelled { order_id: order.id, was_paid: order.is_paid() }).await;
                }
                Ok(order)
            }
            Applied::Unchanged(order) if order.order_status == to => Ok(order),
            Applied::Unchanged(order) => {
                warn!(order_id = %order.id, current = order.order_status.as_str(), "lost a status update race");
                Err(CommerceError::InvalidTransition(format!("Order status is now {}", order.order_status.as_str())))
            }
        }
    }

    /// Manual payment corrections. Failed -> Paid is allowed here and nowhere
    /// else; Paid is final.
    #[instrument(skip(self), fields(to = to.as_str()))]
    pub async fn update_payment_status(&self, order_id: Uuid, to: PaymentStatus) -> Result<Order> {
        let order = self.load(order_id).await?;
        let from = order.payment_status;
        if from == to { return Ok(order); }
        if !from.can_transition_to(to, TransitionSource::Administrator) {
            return Err(CommerceError::InvalidTransition(format!("Cannot change payment status from {} to {}", from.as_str(), to.as_str())));
        }

        let change = PaymentChange { allowed_from: vec![from], to, payment_ref: None, at: Utc::now() };
        match self.store.transition_payment(order_id, &change).await.map_err(not_found)? {
            Applied::Changed(order) => {
                info!(order_id = %order.id, from = from.as_str(), "payment status set by administrator");
                let event = match to {
                    PaymentStatus::Paid => OrderEvent::PaymentSettled { order_id: order.id, payment_ref: order.payment_provider_ref.clone(), previous: from },
                    _ => OrderEvent::PaymentFailed { order_id: order.id },
                };
                self.notifier.notify(&event).await;
                Ok(order)
            }
            Applied::Unchanged(order) if order.payment_status == to => Ok(order),
            Applied::Unchanged(order) => {
                warn!(order_id = %order.id, current = order.payment_status.as_str(), "lost a payment update race");
                Err(CommerceError::InvalidTransition(format!("Payment status is now {}", order.payment_status.as_str())))
            }
        }
    }

    /// Removes an unpaid order outright; a paid one is kept and cancelled.
    #[instrument(skip(self))]
    pub async fn delete(&self, order_id: Uuid) -> Result<&'static str> {
        let before = self.load(order_id).await?;
        match self.store.delete_or_cancel(order_id).await.map_err(not_found)? {
            Deletion::Removed => {
                info!(%order_id, "order removed");
                self.notifier.notify(&OrderEvent::Removed { order_id }).await;
                Ok("Order removed")
            }
            Deletion::Cancelled(order) => {
                info!(%order_id, "paid order cancelled instead of removed");
                if before.order_status != OrderStatus::Cancelled {
                    self.notifier.notify(&OrderEvent::Cancelled { order_id: order.id, was_paid: true }).await;
                }
                Ok("Order cancelled because it was already paid")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{PricedLineItem, ShippingAddress};
    use crate::domain::pricing::{compute_totals, PricedOrderDraft};
    use crate::domain::value_objects::Quantity;
    use crate::services::notifier::RecordingNotifier;
    use crate::store::{MemoryStore, OrderStore};
    use rust_decimal_macros::dec;

    async fn placed(store: &MemoryStore) -> Order {
        let line = PricedLineItem { product_id: Uuid::new_v4(), title: "Mala".into(), unit_price: dec!(300), quantity: Quantity::new(1).unwrap(), image: String::new(), category: "Rudraksha".into(), subcategory: None };
        let draft = PricedOrderDraft { lines: vec![line], coupon: None, totals: compute_totals(dec!(300), dec!(0)) };
        let order = Order::place(Uuid::new_v4(), draft, ShippingAddress::default(), "card", Utc::now()).unwrap();
        store.commit_checkout(&order, 0).await.unwrap();
        order
    }

    fn setup() -> (Arc<MemoryStore>, Arc<RecordingNotifier>, OrderService) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = OrderService::new(store.clone(), notifier.clone());
        (store, notifier, service)
    }

    #[tokio::test]
    async fn test_ship_then_deliver() {
        let (store, notifier, service) = setup();
        let order = placed(&store).await;
        service.update_status(order.id, OrderStatus::Shipped).await.unwrap();
        let delivered = service.update_status(order.id, OrderStatus::Delivered).await.unwrap();
        assert!(delivered.delivered_at.is_some());
        // Re-setting is a no-op.
        service.update_status(order.id, OrderStatus::Delivered).await.unwrap();
        assert_eq!(notifier.count("status_changed").await, 2);

        let err = service.update_status(order.id, OrderStatus::Cancelled).await.unwrap_err();
        assert!(matches!(err, CommerceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_cannot_skip_shipping() {
        let (store, _, service) = setup();
        let order = placed(&store).await;
        assert!(service.update_status(order.id, OrderStatus::Delivered).await.is_err());
    }

    #[tokio::test]
    async fn test_admin_payment_edges() {
        let (store, notifier, service) = setup();
        let order = placed(&store).await;
        service.update_payment_status(order.id, PaymentStatus::Failed).await.unwrap();
        let paid = service.update_payment_status(order.id, PaymentStatus::Paid).await.unwrap();
        assert!(paid.paid_at.is_some());
        assert!(service.update_payment_status(order.id, PaymentStatus::Pending).await.is_err());
        assert!(service.update_payment_status(order.id, PaymentStatus::Failed).await.is_err());
        assert_eq!(notifier.count("payment_settled").await, 1);
    }

    #[tokio::test]
    async fn test_owner_or_admin_only() {
        let (store, _, service) = setup();
        let order = placed(&store).await;
        assert!(service.get(order.id, &Caller::user(order.user_id)).await.is_ok());
        assert!(service.get(order.id, &Caller::admin(Uuid::new_v4())).await.is_ok());
        assert!(matches!(service.get(order.id, &Caller::user(Uuid::new_v4())).await, Err(CommerceError::Forbidden(_))));
        assert!(matches!(service.get(Uuid::new_v4(), &Caller::user(order.user_id)).await, Err(CommerceError::OrderNotFound)));
    }

    #[tokio::test]
    async fn test_delete_unpaid_and_paid() {
        let (store, notifier, service) = setup();
        let unpaid = placed(&store).await;
        assert_eq!(service.delete(unpaid.id).await.unwrap(), "Order removed");
        assert!(store.find_order(unpaid.id).await.unwrap().is_none());

        let paid = placed(&store).await;
        service.update_payment_status(paid.id, PaymentStatus::Paid).await.unwrap();
        assert_eq!(service.delete(paid.id).await.unwrap(), "Order cancelled because it was already paid");
        assert_eq!(service.delete(paid.id).await.unwrap(), "Order cancelled because it was already paid");
        let kept = store.find_order(paid.id).await.unwrap().unwrap();
        assert_eq!(kept.order_status, OrderStatus::Cancelled);
        assert!(kept.is_paid());
        assert_eq!(notifier.count("removed").await, 1);
        assert_eq!(notifier.count("cancelled").await, 1);
        assert!(notifier.events().await.iter().all(|e| !matches!(e, OrderEvent::Cancelled { was_paid: false, .. })));
    }
}
