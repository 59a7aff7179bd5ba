use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{ApiJson, AuthUser};
use super::AppState;
use crate::domain::aggregates::Cart;
use crate::domain::value_objects::Quantity;
use crate::{CommerceError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddToCartRequest { pub product_id: Uuid, #[serde(default)] pub quantity: Option<u32> }

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetQuantityRequest { pub quantity: u32 }

pub async fn get_cart(State(s): State<AppState>, AuthUser(caller): AuthUser) -> Result<Json<Cart>> {
    Ok(Json(s.carts.get(caller.user_id).await?))
}

pub async fn add_to_cart(State(s): State<AppState>, AuthUser(caller): AuthUser, ApiJson(r): ApiJson<AddToCartRequest>) -> Result<Json<Cart>> {
    let quantity = Quantity::new(r.quantity.unwrap_or(1)).map_err(|e| CommerceError::Validation(e.to_string()))?;
    Ok(Json(s.carts.add(caller.user_id, r.product_id, quantity).await?))
}

pub async fn set_quantity(State(s): State<AppState>, AuthUser(caller): AuthUser, Path(product_id): Path<Uuid>, ApiJson(r): ApiJson<SetQuantityRequest>) -> Result<Json<Cart>> {
    Ok(Json(s.carts.set_quantity(caller.user_id, product_id, r.quantity).await?))
}

pub async fn remove_from_cart(State(s): State<AppState>, AuthUser(caller): AuthUser, Path(product_id): Path<Uuid>) -> Result<Json<Cart>> {
    Ok(Json(s.carts.remove(caller.user_id, product_id).await?))
}
