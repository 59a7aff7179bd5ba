use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::extract::{AdminUser, ApiJson};
use super::AppState;
use crate::domain::aggregates::Coupon;
use crate::services::{CouponPreview, CouponUpdate, NewCoupon, PreviewItem, PublicCoupon};
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplyCouponRequest {
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub cart_total: Option<Decimal>,
    #[serde(default)]
    pub cart_items: Vec<PreviewItem>,
}

pub async fn apply_coupon(State(s): State<AppState>, ApiJson(r): ApiJson<ApplyCouponRequest>) -> Result<Json<CouponPreview>> {
    let code = r.coupon_code.unwrap_or_default();
    let total = r.cart_total.unwrap_or(Decimal::ZERO);
    Ok(Json(s.coupons.preview(&code, total, &r.cart_items, Utc::now()).await?))
}

pub async fn create_coupon(State(s): State<AppState>, AdminUser(_): AdminUser, ApiJson(r): ApiJson<NewCoupon>) -> Result<(StatusCode, Json<Coupon>)> {
    Ok((StatusCode::CREATED, Json(s.coupons.create(r, Utc::now()).await?)))
}

pub async fn list_coupons(State(s): State<AppState>, AdminUser(_): AdminUser) -> Result<Json<Vec<Coupon>>> {
    Ok(Json(s.coupons.list_all().await?))
}

pub async fn list_active_coupons(State(s): State<AppState>) -> Result<Json<Vec<PublicCoupon>>> {
    Ok(Json(s.coupons.list_active(Utc::now()).await?))
}

pub async fn update_coupon(
    State(s): State<AppState>,
    AdminUser(_): AdminUser,
    Path(code): Path<String>,
    ApiJson(r): ApiJson<CouponUpdate>,
) -> Result<Json<Coupon>> {
    Ok(Json(s.coupons.update(&code, r).await?))
}

pub async fn disable_coupon(State(s): State<AppState>, AdminUser(_): AdminUser, Path(code): Path<String>) -> Result<Json<serde_json::Value>> {
    s.coupons.disable(&code).await?;
    Ok(Json(serde_json::json!({ "message": "Coupon disabled" })))
}
