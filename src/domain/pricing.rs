//! Tax and total arithmetic for a priced cart.

use rust_decimal::Decimal;
use serde::Serialize;
use crate::domain::aggregates::PricedLineItem;
use crate::domain::value_objects::{round_currency, CouponCode};

/// Flat GST rate applied to the post-discount amount.
pub const TAX_RATE: Decimal = Decimal::from_parts(18, 0, 0, false, 2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub final_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: CouponCode,
    pub discount_amount: Decimal,
    pub eligible_amount: Decimal,
}

/// Output of the pricing engine: frozen lines plus money totals.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedOrderDraft {
    pub lines: Vec<PricedLineItem>,
    pub coupon: Option<AppliedCoupon>,
    pub totals: Totals,
}

/// Rounds twice: once for the tax, once for the final amount.
pub fn compute_totals(subtotal: Decimal, discount: Decimal) -> Totals {
    let discount = discount.min(subtotal).max(Decimal::ZERO);
    let taxable = (subtotal - discount).max(Decimal::ZERO);
    let tax = round_currency(taxable * TAX_RATE);
    let final_amount = round_currency(taxable + tax);
    Totals { subtotal, discount, tax, final_amount }
}
