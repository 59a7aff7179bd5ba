//! Cart maintenance.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartError};
use crate::domain::value_objects::Quantity;
use crate::store::{Store, StoreError};
use crate::{CommerceError, Result};

const SAVE_ATTEMPTS: usize = 3;

impl From<CartError> for CommerceError {
    fn from(e: CartError) -> Self {
        match e { CartError::ItemNotFound => CommerceError::CartItemNotFound }
    }
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    pub async fn get(&self, user_id: Uuid) -> Result<Cart> {
        Ok(self.store.load_cart(user_id).await?)
    }

    /// Adds a product, merging with an existing line.
    #[instrument(skip(self))]
    pub async fn add(&self, user_id: Uuid, product_id: Uuid, quantity: Quantity) -> Result<Cart> {
        if self.store.snapshot(product_id).await?.is_none() {
            return Err(CommerceError::ProductNotFound(product_id));
        }
        self.mutate(user_id, |cart| { cart.add_line(product_id, quantity); Ok(()) }).await
    }

    #[instrument(skip(self))]
    pub async fn set_quantity(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> Result<Cart> {
        self.mutate(user_id, |cart| cart.set_quantity(product_id, quantity)).await
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<Cart> {
        self.mutate(user_id, |cart| cart.remove_line(product_id)).await
    }

    /// Load, edit, save under the version guard. A concurrent edit makes the
    /// save fail, in which case the edit is replayed on a fresh copy.
    async fn mutate<F>(&self, user_id: Uuid, edit: F) -> Result<Cart>
    where
        F: Fn(&mut Cart) -> std::result::Result<(), CartError> + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let mut cart = self.store.load_cart(user_id).await?;
            edit(&mut cart)?;
            match self.store.save_cart(&mut cart).await {
                Ok(()) => return Ok(cart),
                Err(StoreError::CartChanged) if attempt < SAVE_ATTEMPTS => {
                    debug!(%user_id, attempt, "cart changed concurrently, retrying");
                    attempt += 1;
                }
                Err(StoreError::CartChanged) => return Err(CommerceError::CartChanged),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
