//! Coupon Aggregate
//!
//! Holds the single coupon evaluator shared by checkout and the apply preview.
//! Evaluation is pure: it never touches `used_count`. The usage increment is
//! done by the store as part of the checkout commit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::CouponCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType { Percentage, Flat }

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Percentage => "percentage", Self::Flat => "flat" }
    }
    pub fn parse(value: &str) -> Option<Self> {
        match value { "percentage" => Some(Self::Percentage), "flat" => Some(Self::Flat), _ => None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: CouponCode,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub expiry_date: DateTime<Utc>,
    pub is_active: bool,
    pub usage_limit: Option<u32>,
    pub used_count: u32,
    pub applicable_category: Option<String>,
    pub applicable_subcategory: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A priced line as seen by the evaluator.
pub trait DiscountableLine {
    fn line_total(&self) -> Decimal;
    fn category(&self) -> &str;
    fn subcategory(&self) -> Option<&str>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CouponDiscount {
    pub discount_amount: Decimal,
    pub eligible_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    #[error("invalid or not found")]
    Unknown,
    #[error("inactive")]
    Inactive,
    #[error("expired")]
    Expired,
    #[error("usage limit exceeded")]
    UsageLimitExceeded,
    #[error("minimum order amount of {0} not met")]
    MinimumOrderNotMet(Decimal),
    #[error("not applicable to any cart item")]
    NotApplicable,
    #[error("amount out of range")]
    AmountOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponError {
    #[error("discount value must be positive")]
    NonPositiveValue,
    #[error("percentage discount cannot exceed 100")]
    PercentageTooLarge,
    #[error("amounts cannot be negative")]
    NegativeAmount,
    #[error("applicable subcategory requires an applicable category")]
    SubcategoryWithoutCategory,
    #[error("usage limit is below the number of times already used")]
    LimitBelowUsage,
}

impl Coupon {
    /// Checks the structural invariants an administrator must respect.
    pub fn validate(&self) -> Result<(), CouponError> {
        if self.discount_value <= Decimal::ZERO { return Err(CouponError::NonPositiveValue); }
        if self.discount_type == DiscountType::Percentage && self.discount_value > Decimal::ONE_HUNDRED {
            return Err(CouponError::PercentageTooLarge);
        }
        if self.min_order_amount < Decimal::ZERO || self.max_discount_amount.is_some_and(|m| m < Decimal::ZERO) {
            return Err(CouponError::NegativeAmount);
        }
        if self.subcategory_scope().is_some() && self.category_scope().is_none() {
            return Err(CouponError::SubcategoryWithoutCategory);
        }
        if self.usage_limit.is_some_and(|limit| self.used_count > limit) {
            return Err(CouponError::LimitBelowUsage);
        }
        Ok(())
    }

    pub fn category_scope(&self) -> Option<&str> { non_blank(self.applicable_category.as_deref()) }
    pub fn subcategory_scope(&self) -> Option<&str> { non_blank(self.applicable_subcategory.as_deref()) }

    pub fn is_exhausted(&self) -> bool { self.usage_limit.is_some_and(|limit| self.used_count >= limit) }

    /// Decides applicability and computes the discount, short-circuiting on
    /// the first failed rule.
    pub fn evaluate<L: DiscountableLine>(&self, lines: &[L], cart_subtotal: Decimal, now: DateTime<Utc>) -> Result<CouponDiscount, CouponRejection> {
        if !self.is_active { return Err(CouponRejection::Inactive); }
        if now > self.expiry_date { return Err(CouponRejection::Expired); }
        if self.is_exhausted() { return Err(CouponRejection::UsageLimitExceeded); }
        if cart_subtotal < self.min_order_amount { return Err(CouponRejection::MinimumOrderNotMet(self.min_order_amount)); }

        let eligible_amount = self.eligible_amount(lines, cart_subtotal)?;
        let discount = match self.discount_type {
            DiscountType::Percentage => {
                let raw = eligible_amount.checked_mul(self.discount_value).ok_or(CouponRejection::AmountOutOfRange)? / Decimal::ONE_HUNDRED;
                match self.max_discount_amount { Some(cap) => raw.min(cap), None => raw }
            }
            // Scoped to the eligible amount, not the whole cart.
            DiscountType::Flat => self.discount_value.min(eligible_amount),
        };
        let discount_amount = discount.min(cart_subtotal).max(Decimal::ZERO);
        Ok(CouponDiscount { discount_amount, eligible_amount })
    }

    fn eligible_amount<L: DiscountableLine>(&self, lines: &[L], cart_subtotal: Decimal) -> Result<Decimal, CouponRejection> {
        let Some(category) = self.category_scope() else { return Ok(cart_subtotal) };
        let subcategory = self.subcategory_scope();
        let mut matched = false;
        let mut total = Decimal::ZERO;
        for line in lines {
            if !same_label(line.category(), category) { continue; }
            if let Some(sub) = subcategory {
                if !line.subcategory().is_some_and(|s| same_label(s, sub)) { continue; }
            }
            matched = true;
            total = total.checked_add(line.line_total()).ok_or(CouponRejection::AmountOutOfRange)?;
        }
        if !matched { return Err(CouponRejection::NotApplicable); }
        Ok(total)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> { value.filter(|v| !v.trim().is_empty()) }

fn same_label(a: &str, b: &str) -> bool { a.trim().to_lowercase() == b.trim().to_lowercase() }

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct Line { total: Decimal, category: &'static str, subcategory: Option<&'static str> }

    impl DiscountableLine for Line {
        fn line_total(&self) -> Decimal { self.total }
        fn category(&self) -> &str { self.category }
        fn subcategory(&self) -> Option<&str> { self.subcategory }
    }

    fn coupon(discount_type: DiscountType, value: Decimal) -> Coupon {
        Coupon {
            code: CouponCode::new("SAVE").unwrap(), discount_type, discount_value: value,
            min_order_amount: Decimal::ZERO, max_discount_amount: None,
            expiry_date: Utc::now() + Duration::days(30), is_active: true,
            usage_limit: None, used_count: 0, applicable_category: None, applicable_subcategory: None,
            created_at: Utc::now(),
        }
    }

    fn gem_cart() -> Vec<Line> {
        vec![
            Line { total: dec!(1000), category: "Gemstones", subcategory: Some("Quartz") },
            Line { total: dec!(200), category: "Rudraksha", subcategory: None },
        ]
    }

    #[test]
    fn test_percentage_scoped_to_category() {
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.applicable_category = Some("gemstones".into());
        let d = c.evaluate(&gem_cart(), dec!(1200), Utc::now()).unwrap();
        assert_eq!(d.eligible_amount, dec!(1000));
        assert_eq!(d.discount_amount, dec!(100));
    }

    #[test]
    fn test_percentage_cap() {
        let mut c = coupon(DiscountType::Percentage, dec!(50));
        c.max_discount_amount = Some(dec!(150));
        let d = c.evaluate(&gem_cart(), dec!(1200), Utc::now()).unwrap();
        assert_eq!(d.discount_amount, dec!(150));
    }

    #[test]
    fn test_flat_capped_at_eligible_not_subtotal() {
        let mut c = coupon(DiscountType::Flat, dec!(500));
        c.applicable_category = Some("Rudraksha".into());
        let d = c.evaluate(&gem_cart(), dec!(1200), Utc::now()).unwrap();
        assert_eq!(d.discount_amount, dec!(200));
    }

    #[test]
    fn test_subcategory_narrows() {
        let mut c = coupon(DiscountType::Flat, dec!(50));
        c.applicable_category = Some("Gemstones".into());
        c.applicable_subcategory = Some("Agate".into());
        assert_eq!(c.evaluate(&gem_cart(), dec!(1200), Utc::now()), Err(CouponRejection::NotApplicable));
        c.applicable_subcategory = Some(" quartz ".into());
        assert_eq!(c.evaluate(&gem_cart(), dec!(1200), Utc::now()).unwrap().discount_amount, dec!(50));
    }

    #[test]
    fn test_rule_order() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Flat, dec!(50));
        c.min_order_amount = dec!(5000);
        c.usage_limit = Some(1);
        c.used_count = 1;
        c.expiry_date = now - Duration::days(1);
        c.is_active = false;
        assert_eq!(c.evaluate(&gem_cart(), dec!(1200), now), Err(CouponRejection::Inactive));
        c.is_active = true;
        assert_eq!(c.evaluate(&gem_cart(), dec!(1200), now), Err(CouponRejection::Expired));
        c.expiry_date = now + Duration::days(1);
        assert_eq!(c.evaluate(&gem_cart(), dec!(1200), now), Err(CouponRejection::UsageLimitExceeded));
        c.used_count = 0;
        assert_eq!(c.evaluate(&gem_cart(), dec!(1200), now), Err(CouponRejection::MinimumOrderNotMet(dec!(5000))));
    }

    #[test]
    fn test_discount_clamped_to_subtotal() {
        let c = coupon(DiscountType::Flat, dec!(5000));
        let d = c.evaluate(&gem_cart(), dec!(1200), Utc::now()).unwrap();
        assert_eq!(d.discount_amount, dec!(1200));
    }

    #[test]
    fn test_huge_amounts_rejected_not_panicking() {
        let c = coupon(DiscountType::Percentage, dec!(10));
        let lines = vec![Line { total: Decimal::MAX, category: "Gemstones", subcategory: None }];
        assert_eq!(c.evaluate(&lines, Decimal::MAX, Utc::now()), Err(CouponRejection::AmountOutOfRange));

        let mut scoped = coupon(DiscountType::Flat, dec!(10));
        scoped.applicable_category = Some("Gemstones".into());
        let twice = vec![
            Line { total: Decimal::MAX, category: "Gemstones", subcategory: None },
            Line { total: Decimal::MAX, category: "Gemstones", subcategory: None },
        ];
        assert_eq!(scoped.evaluate(&twice, dec!(1), Utc::now()), Err(CouponRejection::AmountOutOfRange));
    }

    #[test]
    fn test_validate_subcategory_requires_category() {
        let mut c = coupon(DiscountType::Flat, dec!(50));
        c.applicable_subcategory = Some("Quartz".into());
        assert_eq!(c.validate(), Err(CouponError::SubcategoryWithoutCategory));
        c.applicable_category = Some("Gemstones".into());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_limit_not_below_usage() {
        let mut c = coupon(DiscountType::Flat, dec!(50));
        c.used_count = 3;
        c.usage_limit = Some(2);
        assert_eq!(c.validate(), Err(CouponError::LimitBelowUsage));
        c.usage_limit = Some(3);
        assert!(c.validate().is_ok());
    }
}
