//! Pricing Engine: cart lines to a priced, stock-checked order draft.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use crate::domain::aggregates::{Cart, DiscountableLine, PricedLineItem};
use crate::domain::pricing::{compute_totals, AppliedCoupon, PricedOrderDraft};
use crate::domain::value_objects::CouponCode;
use crate::services::coupons::evaluate_code;
use crate::store::Store;
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct PricingEngine {
    store: Arc<dyn Store>,
}

impl PricingEngine {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    /// Reads a fresh snapshot per line. Stock is not reserved: two checkouts
    /// for the last unit can both pass this check.
    #[instrument(skip(self, cart), fields(user_id = %cart.user_id(), lines = cart.lines().len()))]
    pub async fn price(&self, cart: &Cart, coupon_code: Option<&CouponCode>, now: DateTime<Utc>) -> Result<PricedOrderDraft> {
        if cart.is_empty() { return Err(CommerceError::EmptyCart); }

        let mut lines = Vec::with_capacity(cart.lines().len());
        for line in cart.lines() {
            let product = self.store.snapshot(line.product_id).await?.ok_or(CommerceError::ProductNotFound(line.product_id))?;
            if !product.has_stock_for(line.quantity) {
                return Err(CommerceError::InsufficientStock(product.title));
            }
            lines.push(PricedLineItem::freeze(&product, line.quantity));
        }

        let subtotal: Decimal = lines.iter().map(DiscountableLine::line_total).sum();
        let coupon = match coupon_code {
            Some(code) => {
                let (_, discount) = evaluate_code(self.store.as_ref(), code, &lines, subtotal, now).await?;
                debug!(code = %code, discount = %discount.discount_amount, eligible = %discount.eligible_amount, "coupon applied");
                Some(AppliedCoupon { code: code.clone(), discount_amount: discount.discount_amount, eligible_amount: discount.eligible_amount })
            }
            None => None,
        };
        let discount = coupon.as_ref().map_or(Decimal::ZERO, |c| c.discount_amount);
        Ok(PricedOrderDraft { lines, coupon, totals: compute_totals(subtotal, discount) })
    }
}
