use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{AdminUser, ApiJson, AuthUser};
use super::AppState;
use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus};
use crate::store::OrderFilter;
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateStatusRequest { pub order_status: OrderStatus }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdatePaymentRequest { pub payment_status: PaymentStatus }

pub async fn my_orders(State(s): State<AppState>, AuthUser(caller): AuthUser) -> Result<Json<Vec<Order>>> {
    Ok(Json(s.orders.mine(caller.user_id).await?))
}

pub async fn get_order(State(s): State<AppState>, AuthUser(caller): AuthUser, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.orders.get(id, &caller).await?))
}

pub async fn list_orders(State(s): State<AppState>, AdminUser(_): AdminUser, Query(filter): Query<OrderFilter>) -> Result<Json<Vec<Order>>> {
    Ok(Json(s.orders.list(&filter).await?))
}

/// Same listing narrowed to one customer; the path wins over a `userId` query.
pub async fn user_orders(
    State(s): State<AppState>,
    AdminUser(_): AdminUser,
    Path(user_id): Path<Uuid>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<Order>>> {
    let filter = OrderFilter { user_id: Some(user_id), ..filter };
    Ok(Json(s.orders.list(&filter).await?))
}

pub async fn admin_get_order(State(s): State<AppState>, AdminUser(caller): AdminUser, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.orders.get(id, &caller).await?))
}

pub async fn update_order_status(State(s): State<AppState>, AdminUser(_): AdminUser, Path(id): Path<Uuid>, ApiJson(r): ApiJson<UpdateStatusRequest>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_status(id, r.order_status).await?))
}

pub async fn update_payment_status(State(s): State<AppState>, AdminUser(_): AdminUser, Path(id): Path<Uuid>, ApiJson(r): ApiJson<UpdatePaymentRequest>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_payment_status(id, r.payment_status).await?))
}

pub async fn delete_order(State(s): State<AppState>, AdminUser(_): AdminUser, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>> {
    let message = s.orders.delete(id).await?;
    Ok(Json(serde_json::json!({ "message": message })))
}
