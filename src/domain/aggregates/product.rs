//! Product snapshot read by pricing

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Quantity;

/// Current price, stock and categorisation of a product, read at the instant
/// a cart is priced. Never cached across a pricing pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub stock: u32,
    pub images: Vec<String>,
    pub category: String,
    pub subcategory: Option<String>,
}

impl ProductSnapshot {
    pub fn has_stock_for(&self, qty: Quantity) -> bool { qty.value() <= self.stock }
    pub fn primary_image(&self) -> &str { self.images.first().map(String::as_str).unwrap_or("") }
}
