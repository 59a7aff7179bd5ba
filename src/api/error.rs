//! HTTP mapping for [`CommerceError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::CommerceError;

impl CommerceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptyCart
            | Self::InsufficientStock(_)
            | Self::CouponRejected { .. }
            | Self::InvalidCoupon(_)
            | Self::DuplicateCoupon
            | Self::BelowMinimumPayable { .. }
            | Self::AlreadyPaid
            | Self::InvalidTransition(_)
            | Self::SessionMismatch
            | Self::Validation(_)
            | Self::InvalidSignature(_)
            | Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::ProductNotFound(_)
            | Self::CartItemNotFound
            | Self::UnknownCoupon
            | Self::CouponNotFound
            | Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::CartChanged => StatusCode::CONFLICT,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Gateway(GatewayError::Timeout | GatewayError::Transport(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Gateway(_) => {
                error!(error = %self, "payment gateway error");
                "Payment service unavailable, please retry".to_string()
            }
            Self::Storage(_) => {
                error!(error = %self, "storage error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
