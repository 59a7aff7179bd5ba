//! PostgreSQL store.
//!
//! Conditional updates (`... WHERE payment_status = ANY($n) RETURNING *`) give
//! per-row serialization without explicit locks. The checkout commit runs in
//! one transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Applied, CartStore, CouponStore, Deletion, OrderFilter, OrderStore, PaymentChange, ProductStore, StatusChange, StoreError};
use crate::domain::aggregates::{Cart, CartLine, Coupon, DiscountType, Order, OrderStatus, PaymentStatus, PricedLineItem, ProductSnapshot, ShippingAddress};
use crate::domain::value_objects::CouponCode;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[derive(sqlx::FromRow)]
struct ProductRow { id: Uuid, title: String, price: Decimal, stock: i32, images: Vec<String>, category: String, subcategory: Option<String> }

impl From<ProductRow> for ProductSnapshot {
    fn from(r: ProductRow) -> Self {
        Self { id: r.id, title: r.title, price: r.price, stock: u32::try_from(r.stock).unwrap_or(0), images: r.images, category: r.category, subcategory: r.subcategory }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow { user_id: Uuid, lines: Json<Vec<CartLine>>, version: i64, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct CouponRow {
    code: String, discount_type: String, discount_value: Decimal, min_order_amount: Decimal,
    max_discount_amount: Option<Decimal>, expiry_date: DateTime<Utc>, is_active: bool,
    usage_limit: Option<i32>, used_count: i32, applicable_category: Option<String>,
    applicable_subcategory: Option<String>, created_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;
    fn try_from(r: CouponRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("coupon {}: {what}", r.code));
        Ok(Self {
            code: CouponCode::new(r.code.clone()).map_err(|_| corrupt("code"))?,
            discount_type: DiscountType::parse(&r.discount_type).ok_or_else(|| corrupt("discount_type"))?,
            discount_value: r.discount_value,
            min_order_amount: r.min_order_amount,
            max_discount_amount: r.max_discount_amount,
            expiry_date: r.expiry_date,
            is_active: r.is_active,
            usage_limit: r.usage_limit.map(u32::try_from).transpose().map_err(|_| corrupt("usage_limit"))?,
            used_count: u32::try_from(r.used_count).map_err(|_| corrupt("used_count"))?,
            applicable_category: r.applicable_category,
            applicable_subcategory: r.applicable_subcategory,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, user_id: Uuid, line_items: Json<Vec<PricedLineItem>>, subtotal: Decimal,
    coupon_code: Option<String>, discount_amount: Decimal, tax_amount: Decimal, final_amount: Decimal,
    payment_method: String, payment_status: String, payment_provider_ref: Option<String>,
    paid_at: Option<DateTime<Utc>>, order_status: String, delivered_at: Option<DateTime<Utc>>,
    shipping_address: Json<ShippingAddress>, created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("order {}: {what}", r.id));
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            line_items: r.line_items.0,
            subtotal: r.subtotal,
            coupon_code: r.coupon_code.map(CouponCode::new).transpose().map_err(|_| corrupt("coupon_code"))?,
            discount_amount: r.discount_amount,
            tax_amount: r.tax_amount,
            final_amount: r.final_amount,
            payment_method: r.payment_method,
            payment_status: PaymentStatus::parse(&r.payment_status).ok_or_else(|| corrupt("payment_status"))?,
            payment_provider_ref: r.payment_provider_ref,
            paid_at: r.paid_at,
            order_status: OrderStatus::parse(&r.order_status).ok_or_else(|| corrupt("order_status"))?,
            delivered_at: r.delivered_at,
            shipping_address: r.shipping_address.0,
            created_at: r.created_at,
        })
    }
}

fn orders_from(rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
    rows.into_iter().map(Order::try_from).collect()
}

fn limit_to_i32(value: Option<u32>) -> Result<Option<i32>, StoreError> {
    value.map(i32::try_from).transpose().map_err(|_| StoreError::Corrupt("usage_limit out of range".into()))
}

#[async_trait]
impl ProductStore for PgStore {
    async fn snapshot(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, title, price, stock, images, category, subcategory FROM products WHERE id = $1")
            .bind(product_id).fetch_optional(&self.pool).await?;
        Ok(row.map(ProductSnapshot::from))
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn load_cart(&self, user_id: Uuid) -> Result<Cart, StoreError> {
        let row = sqlx::query_as::<_, CartRow>("SELECT user_id, lines, version, updated_at FROM carts WHERE user_id = $1")
            .bind(user_id).fetch_optional(&self.pool).await?;
        Ok(match row {
            Some(r) => Cart::restore(r.user_id, r.lines.0, r.version, r.updated_at),
            None => Cart::empty(user_id),
        })
    }

    async fn save_cart(&self, cart: &mut Cart) -> Result<(), StoreError> {
        let lines = Json(cart.lines().to_vec());
        let result = if cart.version() == 0 {
            sqlx::query("INSERT INTO carts (user_id, lines, version, updated_at) VALUES ($1, $2, 1, $3) ON CONFLICT (user_id) DO NOTHING")
                .bind(cart.user_id()).bind(lines).bind(cart.updated_at())
                .execute(&self.pool).await?
        } else {
            sqlx::query("UPDATE carts SET lines = $2, version = version + 1, updated_at = $3 WHERE user_id = $1 AND version = $4")
                .bind(cart.user_id()).bind(lines).bind(cart.updated_at()).bind(cart.version())
                .execute(&self.pool).await?
        };
        if result.rows_affected() == 0 { return Err(StoreError::CartChanged); }
        cart.mark_saved(cart.version() + 1);
        Ok(())
    }
}

#[async_trait]
impl CouponStore for PgStore {
    async fn find_coupon(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        let row = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(code.as_str()).fetch_optional(&self.pool).await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO coupons (code, discount_type, discount_value, min_order_amount, max_discount_amount, expiry_date, is_active, usage_limit, used_count, applicable_category, applicable_subcategory, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12) ON CONFLICT (code) DO NOTHING",
        )
        .bind(coupon.code.as_str()).bind(coupon.discount_type.as_str()).bind(coupon.discount_value)
        .bind(coupon.min_order_amount).bind(coupon.max_discount_amount).bind(coupon.expiry_date)
        .bind(coupon.is_active).bind(limit_to_i32(coupon.usage_limit)?).bind(limit_to_i32(Some(coupon.used_count))?.unwrap_or(0))
        .bind(&coupon.applicable_category).bind(&coupon.applicable_subcategory).bind(coupon.created_at)
        .execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(StoreError::Duplicate); }
        Ok(())
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>, StoreError> {
        let rows = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons ORDER BY created_at DESC").fetch_all(&self.pool).await?;
        rows.into_iter().map(Coupon::try_from).collect()
    }

    async fn list_active_coupons(&self, now: DateTime<Utc>) -> Result<Vec<Coupon>, StoreError> {
        let rows = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE is_active AND expiry_date >= $1 ORDER BY created_at DESC")
            .bind(now).fetch_all(&self.pool).await?;
        rows.into_iter().map(Coupon::try_from).collect()
    }

    async fn disable_coupon(&self, code: &CouponCode) -> Result<Coupon, StoreError> {
        let row = sqlx::query_as::<_, CouponRow>("UPDATE coupons SET is_active = FALSE, updated_at = NOW() WHERE code = $1 RETURNING *")
            .bind(code.as_str()).fetch_optional(&self.pool).await?;
        row.map(Coupon::try_from).transpose()?.ok_or(StoreError::NotFound)
    }

    async fn update_coupon(&self, coupon: &Coupon) -> Result<Coupon, StoreError> {
        let row = sqlx::query_as::<_, CouponRow>(
            "UPDATE coupons SET discount_type = $2, discount_value = $3, min_order_amount = $4, max_discount_amount = $5, expiry_date = $6, \
             is_active = $7, usage_limit = $8, applicable_category = $9, applicable_subcategory = $10, updated_at = NOW() \
             WHERE code = $1 AND ($8::int IS NULL OR used_count <= $8) RETURNING *",
        )
        .bind(coupon.code.as_str()).bind(coupon.discount_type.as_str()).bind(coupon.discount_value)
        .bind(coupon.min_order_amount).bind(coupon.max_discount_amount).bind(coupon.expiry_date)
        .bind(coupon.is_active).bind(limit_to_i32(coupon.usage_limit)?)
        .bind(&coupon.applicable_category).bind(&coupon.applicable_subcategory)
        .fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Coupon::try_from(row),
            None if self.find_coupon(&coupon.code).await?.is_some() => Err(StoreError::LimitBelowUsage),
            None => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn commit_checkout(&self, order: &Order, cart_version: i64) -> Result<(), StoreError> {
        // Dropping `tx` on any early return rolls everything back.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (id, user_id, line_items, subtotal, coupon_code, discount_amount, tax_amount, final_amount, payment_method, payment_status, order_status, shipping_address, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)",
        )
        .bind(order.id).bind(order.user_id).bind(Json(&order.line_items)).bind(order.subtotal)
        .bind(order.coupon_code.as_ref().map(CouponCode::as_str)).bind(order.discount_amount).bind(order.tax_amount)
        .bind(order.final_amount).bind(&order.payment_method).bind(order.payment_status.as_str())
        .bind(order.order_status.as_str()).bind(Json(&order.shipping_address)).bind(order.created_at)
        .execute(&mut *tx).await?;

        let cleared = sqlx::query("UPDATE carts SET lines = '[]'::jsonb, version = version + 1, updated_at = $3 WHERE user_id = $1 AND version = $2")
            .bind(order.user_id).bind(cart_version).bind(order.created_at)
            .execute(&mut *tx).await?;
        if cleared.rows_affected() == 0 { return Err(StoreError::CartChanged); }

        if let Some(code) = &order.coupon_code {
            let used = sqlx::query(
                "UPDATE coupons SET used_count = used_count + 1, updated_at = NOW() \
                 WHERE code = $1 AND (usage_limit IS NULL OR used_count < usage_limit)",
            )
            .bind(code.as_str()).execute(&mut *tx).await?;
            if used.rows_affected() == 0 { return Err(StoreError::CouponExhausted); }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(&self.pool).await?;
        row.map(Order::try_from).transpose()
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id).fetch_all(&self.pool).await?;
        orders_from(rows)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders \
             WHERE ($1::text IS NULL OR order_status = $1) AND ($2::text IS NULL OR payment_status = $2) \
             AND ($3::timestamptz IS NULL OR created_at >= $3) AND ($4::timestamptz IS NULL OR created_at <= $4) \
             AND ($5::uuid IS NULL OR user_id = $5) \
             ORDER BY created_at DESC",
        )
        .bind(filter.order_status.map(|s| s.as_str())).bind(filter.payment_status.map(|s| s.as_str()))
        .bind(filter.from).bind(filter.to).bind(filter.user_id)
        .fetch_all(&self.pool).await?;
        orders_from(rows)
    }

    async fn transition_payment(&self, order_id: Uuid, change: &PaymentChange) -> Result<Applied<Order>, StoreError> {
        let allowed: Vec<String> = change.allowed_from.iter().map(|s| s.as_str().to_string()).collect();
        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET payment_status = $2::text, \
                payment_provider_ref = COALESCE($3, payment_provider_ref), \
                paid_at = CASE WHEN $2::text = 'Paid' THEN $4 ELSE paid_at END, \
                updated_at = NOW() \
             WHERE id = $1 AND payment_status = ANY($5) RETURNING *",
        )
        .bind(order_id).bind(change.to.as_str()).bind(&change.payment_ref).bind(change.at).bind(allowed)
        .fetch_optional(&self.pool).await?;
        match row {
            Some(r) => Ok(Applied::Changed(r.try_into()?)),
            None => self.find_order(order_id).await?.map(Applied::Unchanged).ok_or(StoreError::NotFound),
        }
    }

    async fn transition_status(&self, order_id: Uuid, change: &StatusChange) -> Result<Applied<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET order_status = $2::text, \
                delivered_at = CASE WHEN $2::text = 'Delivered' THEN $3 ELSE delivered_at END, \
                updated_at = NOW() \
             WHERE id = $1 AND order_status = $4 RETURNING *",
        )
        .bind(order_id).bind(change.to.as_str()).bind(change.at).bind(change.from.as_str())
        .fetch_optional(&self.pool).await?;
        match row {
            Some(r) => Ok(Applied::Changed(r.try_into()?)),
            None => self.find_order(order_id).await?.map(Applied::Unchanged).ok_or(StoreError::NotFound),
        }
    }

    async fn delete_or_cancel(&self, order_id: Uuid) -> Result<Deletion, StoreError> {
        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1 AND payment_status <> 'Paid'")
            .bind(order_id).execute(&self.pool).await?;
        if deleted.rows_affected() == 1 { return Ok(Deletion::Removed); }

        // Paid is final, so nothing can slip between the delete and this update.
        let row = sqlx::query_as::<_, OrderRow>("UPDATE orders SET order_status = 'Cancelled', updated_at = NOW() WHERE id = $1 AND payment_status = 'Paid' RETURNING *")
            .bind(order_id).fetch_optional(&self.pool).await?;
        match row {
            Some(r) => Ok(Deletion::Cancelled(r.try_into()?)),
            None => Err(StoreError::NotFound),
        }
    }
}
