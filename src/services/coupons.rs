//! Coupon administration and the apply preview.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::domain::aggregates::{Coupon, CouponDiscount, CouponError, CouponRejection, DiscountType, DiscountableLine};
use crate::domain::value_objects::{is_storable_amount, CouponCode};
use crate::store::{Store, StoreError};
use crate::{CommerceError, Result};

/// Looks a code up and runs the evaluator. Checkout and preview both go
/// through here.
pub(crate) async fn evaluate_code<L: DiscountableLine + Sync>(
    store: &dyn Store,
    code: &CouponCode,
    lines: &[L],
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<(Coupon, CouponDiscount)> {
    let coupon = store.find_coupon(code).await?.ok_or_else(|| CommerceError::coupon(code.as_str(), CouponRejection::Unknown))?;
    let discount = coupon.evaluate(lines, subtotal, now).map_err(|reason| match reason {
        CouponRejection::AmountOutOfRange => out_of_range(),
        reason => CommerceError::coupon(code.as_str(), reason),
    })?;
    Ok((coupon, discount))
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewCoupon {
    #[validate(length(min = 1, max = 50, message = "code must be 1-50 characters"))]
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    #[serde(default)]
    pub max_discount_amount: Option<Decimal>,
    pub expiry_date: DateTime<Utc>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub applicable_category: Option<String>,
    #[serde(default)]
    pub applicable_subcategory: Option<String>,
}

fn out_of_range() -> CommerceError { CommerceError::Validation("Cart amounts out of range".into()) }

/// Partial edit of a coupon. Absent fields keep their value; `null` clears
/// the nullable ones. The code itself is not editable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CouponUpdate {
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "nullable")]
    pub max_discount_amount: Option<Option<Decimal>>,
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "nullable")]
    pub usage_limit: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub applicable_category: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub applicable_subcategory: Option<Option<String>>,
    pub is_active: Option<bool>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn nullable<'de, T: Deserialize<'de>, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error> {
    Option::<T>::deserialize(deserializer).map(Some)
}

impl CouponUpdate {
    fn apply_to(self, coupon: &mut Coupon) {
        if let Some(v) = self.discount_type { coupon.discount_type = v; }
        if let Some(v) = self.discount_value { coupon.discount_value = v; }
        if let Some(v) = self.min_order_amount { coupon.min_order_amount = v; }
        if let Some(v) = self.max_discount_amount { coupon.max_discount_amount = v; }
        if let Some(v) = self.expiry_date { coupon.expiry_date = v; }
        if let Some(v) = self.usage_limit { coupon.usage_limit = v; }
        if let Some(v) = self.applicable_category { coupon.applicable_category = label(v); }
        if let Some(v) = self.applicable_subcategory { coupon.applicable_subcategory = label(v); }
        if let Some(v) = self.is_active { coupon.is_active = v; }
    }
}

/// A cart line as sent by the storefront for the preview.
///
/// Accepts the flat `{ price, quantity, category }` shape as well as the
/// cart's own `{ product: { price, category, subcategory }, quantity }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "PreviewItemBody")]
pub struct PreviewItem {
    pub price: Decimal,
    pub quantity: u32,
    pub category: String,
    pub subcategory: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewItemBody {
    quantity: u32,
    #[serde(default)]
    product: Option<PreviewProduct>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewProduct {
    price: Decimal,
    #[serde(default)]
    category: String,
    #[serde(default)]
    subcategory: Option<String>,
}

impl TryFrom<PreviewItemBody> for PreviewItem {
    type Error = String;

    fn try_from(body: PreviewItemBody) -> std::result::Result<Self, Self::Error> {
        if let Some(product) = body.product {
            return Ok(Self { price: product.price, quantity: body.quantity, category: product.category, subcategory: product.subcategory });
        }
        let price = body.price.ok_or("cart item is missing a price")?;
        Ok(Self { price, quantity: body.quantity, category: body.category.unwrap_or_default(), subcategory: body.subcategory })
    }
}

impl DiscountableLine for PreviewItem {
    fn line_total(&self) -> Decimal { self.price.saturating_mul(Decimal::from(self.quantity)) }
    fn category(&self) -> &str { &self.category }
    fn subcategory(&self) -> Option<&str> { self.subcategory.as_deref() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponPreview {
    pub coupon_code: CouponCode,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub message: String,
}

/// Shopper-facing coupon listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicCoupon {
    pub code: CouponCode,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub expiry_date: DateTime<Utc>,
    pub applicable_category: Option<String>,
    pub applicable_subcategory: Option<String>,
}

impl From<Coupon> for PublicCoupon {
    fn from(c: Coupon) -> Self {
        Self {
            code: c.code, discount_type: c.discount_type, discount_value: c.discount_value,
            min_order_amount: c.min_order_amount, max_discount_amount: c.max_discount_amount, expiry_date: c.expiry_date,
            applicable_category: c.applicable_category, applicable_subcategory: c.applicable_subcategory,
        }
    }
}

fn label(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct CouponService {
    store: Arc<dyn Store>,
}

impl CouponService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    /// Computes the discount a code would give. Never touches `used_count`.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn preview(&self, code: &str, cart_total: Decimal, items: &[PreviewItem], now: DateTime<Utc>) -> Result<CouponPreview> {
        if code.trim().is_empty() || cart_total <= Decimal::ZERO {
            return Err(CommerceError::Validation("Missing coupon code or cart total".into()));
        }
        if !is_storable_amount(cart_total) || items.iter().any(|item| !is_storable_amount(item.price)) {
            return Err(out_of_range());
        }
        let code = CouponCode::new(code).map_err(|_| CommerceError::UnknownCoupon)?;
        let (coupon, discount) = match evaluate_code(self.store.as_ref(), &code, items, cart_total, now).await {
            Err(CommerceError::CouponRejected { reason: CouponRejection::Unknown, .. }) => return Err(CommerceError::UnknownCoupon),
            other => other?,
        };
        Ok(CouponPreview {
            coupon_code: coupon.code,
            discount_amount: discount.discount_amount,
            final_amount: cart_total - discount.discount_amount,
            message: "Coupon applied successfully".into(),
        })
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: NewCoupon, now: DateTime<Utc>) -> Result<Coupon> {
        input.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
        let code = CouponCode::new(input.code).map_err(|e| CommerceError::InvalidCoupon(e.to_string()))?;
        let coupon = Coupon {
            code,
            discount_type: input.discount_type,
            discount_value: input.discount_value,
            min_order_amount: input.min_order_amount.unwrap_or(Decimal::ZERO),
            max_discount_amount: input.max_discount_amount,
            expiry_date: input.expiry_date,
            is_active: true,
            usage_limit: input.usage_limit,
            used_count: 0,
            applicable_category: label(input.applicable_category),
            applicable_subcategory: label(input.applicable_subcategory),
            created_at: now,
        };
        coupon.validate().map_err(|e| CommerceError::InvalidCoupon(e.to_string()))?;
        match self.store.insert_coupon(&coupon).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => return Err(CommerceError::DuplicateCoupon),
            Err(e) => return Err(e.into()),
        }
        info!(code = %coupon.code, "coupon created");
        Ok(coupon)
    }

    pub async fn list_all(&self) -> Result<Vec<Coupon>> {
        Ok(self.store.list_coupons().await?)
    }

    pub async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<PublicCoupon>> {
        Ok(self.store.list_active_coupons(now).await?.into_iter().map(PublicCoupon::from).collect())
    }

    /// Soft delete: the coupon stays on record, referenced by past orders.
    #[instrument(skip(self))]
    pub async fn disable(&self, code: &str) -> Result<Coupon> {
        let code = CouponCode::new(code).map_err(|_| CommerceError::CouponNotFound)?;
        match self.store.disable_coupon(&code).await {
            Ok(coupon) => { info!(code = %coupon.code, "coupon disabled"); Ok(coupon) }
            Err(StoreError::NotFound) => Err(CommerceError::CouponNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a partial edit and re-checks the coupon invariants before
    /// saving. Usage counts are never touched here.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, code: &str, changes: CouponUpdate) -> Result<Coupon> {
        let code = CouponCode::new(code).map_err(|_| CommerceError::CouponNotFound)?;
        let mut coupon = self.store.find_coupon(&code).await?.ok_or(CommerceError::CouponNotFound)?;
        changes.apply_to(&mut coupon);
        coupon.validate().map_err(|e| CommerceError::InvalidCoupon(e.to_string()))?;
        match self.store.update_coupon(&coupon).await {
            Ok(updated) => { info!(code = %updated.code, active = updated.is_active, "coupon updated"); Ok(updated) }
            Err(StoreError::NotFound) => Err(CommerceError::CouponNotFound),
            Err(StoreError::LimitBelowUsage) => Err(CommerceError::InvalidCoupon(CouponError::LimitBelowUsage.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CouponStore, MemoryStore};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn new_coupon(code: &str) -> NewCoupon {
        NewCoupon {
            code: code.into(), discount_type: DiscountType::Percentage, discount_value: dec!(10),
            min_order_amount: None, max_discount_amount: None, expiry_date: Utc::now() + Duration::days(7),
            usage_limit: Some(1), applicable_category: Some("Gemstones".into()), applicable_subcategory: None,
        }
    }

    fn gem_items() -> Vec<PreviewItem> {
        vec![PreviewItem { price: dec!(500), quantity: 2, category: "gemstones".into(), subcategory: None }]
    }

    #[tokio::test]
    async fn test_preview_does_not_consume_usage() {
        let store = Arc::new(MemoryStore::new());
        let service = CouponService::new(store.clone());
        service.create(new_coupon(" gem10 "), Utc::now()).await.unwrap();

        for _ in 0..3 {
            let preview = service.preview("GEM10", dec!(1000), &gem_items(), Utc::now()).await.unwrap();
            assert_eq!(preview.discount_amount, dec!(100));
            assert_eq!(preview.final_amount, dec!(900));
        }
        let stored = store.find_coupon(&CouponCode::new("GEM10").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.used_count, 0);
    }

    #[tokio::test]
    async fn test_preview_errors() {
        let service = CouponService::new(Arc::new(MemoryStore::new()));
        let err = service.preview("", dec!(1000), &[], Utc::now()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing coupon code or cart total");
        let err = service.preview("NOPE", dec!(1000), &[], Utc::now()).await.unwrap_err();
        assert!(matches!(err, CommerceError::UnknownCoupon));

        service.create(new_coupon("RUDRA"), Utc::now()).await.unwrap();
        let rudraksha = vec![PreviewItem { price: dec!(200), quantity: 1, category: "Rudraksha".into(), subcategory: None }];
        let err = service.preview("RUDRA", dec!(200), &rudraksha, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CommerceError::CouponRejected { reason: CouponRejection::NotApplicable, .. }));
    }

    #[tokio::test]
    async fn test_duplicate_code() {
        let service = CouponService::new(Arc::new(MemoryStore::new()));
        service.create(new_coupon("GEM10"), Utc::now()).await.unwrap();
        let err = service.create(new_coupon("gem10"), Utc::now()).await.unwrap_err();
        assert_eq!(err.to_string(), "Coupon code already exists");
    }

    #[tokio::test]
    async fn test_subcategory_without_category() {
        let service = CouponService::new(Arc::new(MemoryStore::new()));
        let mut input = new_coupon("AGATE");
        input.applicable_category = Some("  ".into());
        input.applicable_subcategory = Some("Agate".into());
        assert!(matches!(service.create(input, Utc::now()).await, Err(CommerceError::InvalidCoupon(_))));
    }

    #[tokio::test]
    async fn test_disable_hides_from_active_listing() {
        let service = CouponService::new(Arc::new(MemoryStore::new()));
        service.create(new_coupon("GEM10"), Utc::now()).await.unwrap();
        service.create(new_coupon("GEM20"), Utc::now()).await.unwrap();
        service.disable("gem10").await.unwrap();

        let active = service.list_active(Utc::now()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].code.as_str(), "GEM20");
        assert_eq!(service.list_all().await.unwrap().len(), 2);

        let err = service.preview("GEM10", dec!(1000), &gem_items(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CommerceError::CouponRejected { reason: CouponRejection::Inactive, .. }));
        assert!(matches!(service.disable("MISSING").await, Err(CommerceError::CouponNotFound)));
    }

    #[tokio::test]
    async fn test_preview_rejects_out_of_range_amounts() {
        let service = CouponService::new(Arc::new(MemoryStore::new()));
        let mut unscoped = new_coupon("WIDE");
        unscoped.applicable_category = None;
        service.create(unscoped, Utc::now()).await.unwrap();
        service.create(new_coupon("GEM10"), Utc::now()).await.unwrap();

        let err = service.preview("WIDE", Decimal::MAX, &[], Utc::now()).await.unwrap_err();
        assert_eq!(err.to_string(), "Cart amounts out of range");

        let huge = vec![PreviewItem { price: Decimal::MAX, quantity: 2, category: "Gemstones".into(), subcategory: None }];
        let err = service.preview("GEM10", dec!(1000), &huge, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CommerceError::Validation(_)));

        let negative = vec![PreviewItem { price: dec!(-500), quantity: 1, category: "Gemstones".into(), subcategory: None }];
        let err = service.preview("GEM10", dec!(1000), &negative, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CommerceError::Validation(_)));
    }

    #[test]
    fn test_preview_item_accepts_nested_product() {
        let nested: PreviewItem = serde_json::from_value(serde_json::json!({
            "product": { "price": "500", "category": "Gemstones", "subcategory": "Quartz", "title": "Rose Quartz" },
            "quantity": 2
        }))
        .unwrap();
        assert_eq!(nested.line_total(), dec!(1000));
        assert_eq!(nested.category, "Gemstones");
        assert_eq!(nested.subcategory.as_deref(), Some("Quartz"));

        let flat: PreviewItem = serde_json::from_value(serde_json::json!({ "price": "200", "quantity": 1, "category": "Rudraksha" })).unwrap();
        assert_eq!(flat.line_total(), dec!(200));

        assert!(serde_json::from_value::<PreviewItem>(serde_json::json!({ "quantity": 1 })).is_err());
    }

    #[tokio::test]
    async fn test_update_reenables_and_revalidates() {
        let store = Arc::new(MemoryStore::new());
        let service = CouponService::new(store.clone());
        service.create(new_coupon("GEM10"), Utc::now()).await.unwrap();
        service.disable("GEM10").await.unwrap();

        let changes: CouponUpdate = serde_json::from_value(serde_json::json!({
            "isActive": true, "discountValue": "15", "maxDiscountAmount": "120", "usageLimit": null
        }))
        .unwrap();
        let updated = service.update("gem10", changes).await.unwrap();
        assert!(updated.is_active);
        assert_eq!(updated.discount_value, dec!(15));
        assert_eq!(updated.max_discount_amount, Some(dec!(120)));
        assert_eq!(updated.usage_limit, None);
        assert_eq!(updated.applicable_category.as_deref(), Some("Gemstones"));

        let preview = service.preview("GEM10", dec!(1000), &gem_items(), Utc::now()).await.unwrap();
        assert_eq!(preview.discount_amount, dec!(120));

        let too_big = CouponUpdate { discount_value: Some(dec!(150)), ..Default::default() };
        assert!(matches!(service.update("GEM10", too_big).await, Err(CommerceError::InvalidCoupon(_))));
        let stored = store.find_coupon(&CouponCode::new("GEM10").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.discount_value, dec!(15));

        assert!(matches!(service.update("MISSING", CouponUpdate::default()).await, Err(CommerceError::CouponNotFound)));
    }

    #[tokio::test]
    async fn test_update_keeps_usage_count() {
        let store = Arc::new(MemoryStore::new());
        let service = CouponService::new(store.clone());
        let mut input = new_coupon("ONCE");
        input.usage_limit = Some(5);
        let mut coupon = service.create(input, Utc::now()).await.unwrap();
        coupon.code = CouponCode::new("TWICE").unwrap();
        coupon.used_count = 2;
        store.insert_coupon(&coupon).await.unwrap();

        let lower = CouponUpdate { usage_limit: Some(Some(1)), ..Default::default() };
        let err = service.update("TWICE", lower).await.unwrap_err();
        assert!(err.to_string().contains("usage limit is below"));

        // A stale copy cannot lower the limit under the stored count either.
        let mut stale = coupon.clone();
        stale.used_count = 0;
        stale.usage_limit = Some(1);
        assert!(matches!(store.update_coupon(&stale).await, Err(StoreError::LimitBelowUsage)));

        let raise = CouponUpdate { usage_limit: Some(Some(10)), ..Default::default() };
        let updated = service.update("TWICE", raise).await.unwrap();
        assert_eq!(updated.usage_limit, Some(10));
        assert_eq!(updated.used_count, 2);
    }
}
