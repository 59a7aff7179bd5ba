//! Storefront Checkout
//!
//! Checkout-to-settlement backend for a self-hosted storefront.
//!
//! ## Features
//! - Cart pricing against live stock with frozen order snapshots
//! - Category-scoped percentage and flat coupons with guarded usage limits
//! - Flat 18% GST on the post-discount amount
//! - Hosted payment sessions for the exact order total
//! - Idempotent settlement from signed webhooks and synchronous verification
//! - Order lifecycle administration (ship, deliver, cancel, delete-or-cancel)

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod services;
pub mod store;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::CouponRejection;
use crate::gateway::{GatewayError, SignatureError};
use crate::store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Item not found in cart")]
    CartItemNotFound,

    #[error("Cart changed during checkout, please retry")]
    CartChanged,

    #[error("Coupon '{code}' rejected: {reason}")]
    CouponRejected { code: String, reason: CouponRejection },

    #[error("Invalid coupon code")]
    UnknownCoupon,

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("Coupon code already exists")]
    DuplicateCoupon,

    #[error("Coupon not found")]
    CouponNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Order total must be at least ₹{minimum} for online payment. Please add more items.")]
    BelowMinimumPayable { minimum: Decimal },

    #[error("Order is already paid")]
    AlreadyPaid,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Payment session does not belong to this order")]
    SessionMismatch,

    #[error("{0}")]
    Validation(String),

    #[error("Webhook signature rejected: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl CommerceError {
    /// Caller mistakes, surfaced verbatim and never retried.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Gateway(_) | Self::Storage(_))
    }

    pub fn coupon(code: impl Into<String>, reason: CouponRejection) -> Self {
        Self::CouponRejected { code: code.into(), reason }
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
