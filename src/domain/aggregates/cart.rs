//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Quantity;

/// A user's cart. The version is bumped by the store on every save, which lets
/// a checkout commit clear exactly the cart it priced.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    user_id: Uuid,
    lines: Vec<CartLine>,
    version: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: Quantity,
}

impl Cart {
    pub fn empty(user_id: Uuid) -> Self {
        Self { user_id, lines: vec![], version: 0, updated_at: Utc::now() }
    }

    pub fn restore(user_id: Uuid, lines: Vec<CartLine>, version: i64, updated_at: DateTime<Utc>) -> Self {
        Self { user_id, lines, version, updated_at }
    }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn version(&self) -> i64 { self.version }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn add_line(&mut self, product_id: Uuid, quantity: Quantity) {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            existing.quantity = existing.quantity.add(quantity);
        } else {
            self.lines.push(CartLine { product_id, quantity });
        }
        self.touch();
    }

    /// Sets a line's quantity; zero removes the line.
    pub fn set_quantity(&mut self, product_id: Uuid, quantity: u32) -> Result<(), CartError> {
        let line = self.lines.iter_mut().find(|l| l.product_id == product_id).ok_or(CartError::ItemNotFound)?;
        match Quantity::new(quantity) {
            Ok(q) => line.quantity = q,
            Err(_) => self.lines.retain(|l| l.product_id != product_id),
        }
        self.touch();
        Ok(())
    }

    pub fn remove_line(&mut self, product_id: Uuid) -> Result<(), CartError> {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        if self.lines.len() == before { return Err(CartError::ItemNotFound); }
        self.touch();
        Ok(())
    }

    /// Called by stores after a successful save.
    pub fn mark_saved(&mut self, version: i64) { self.version = version; }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("Item not found in cart")]
    ItemNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: u32) -> Quantity { Quantity::new(n).unwrap() }

    #[test]
    fn test_cart_operations() {
        let p1 = Uuid::new_v4();
        let mut cart = Cart::empty(Uuid::new_v4());
        cart.add_line(p1, qty(2));
        cart.add_line(p1, qty(1));
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity.value(), 3); // Merged
        cart.set_quantity(p1, 5).unwrap();
        assert_eq!(cart.lines()[0].quantity.value(), 5);
        cart.set_quantity(p1, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_missing_line() {
        let mut cart = Cart::empty(Uuid::new_v4());
        assert_eq!(cart.remove_line(Uuid::new_v4()), Err(CartError::ItemNotFound));
        assert_eq!(cart.set_quantity(Uuid::new_v4(), 1), Err(CartError::ItemNotFound));
    }
}
