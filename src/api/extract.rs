//! Request extractors: caller identity and JSON bodies.
//!
//! Authentication happens upstream. The gateway in front of this service sets
//! `x-user-id` and `x-user-role` on every authenticated request.

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::services::{Caller, Role};
use crate::CommerceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn caller_from(parts: &Parts) -> Result<Caller, CommerceError> {
    let user_id = header(parts, USER_ID_HEADER)
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(CommerceError::Unauthenticated)?;
    let role = match header(parts, USER_ROLE_HEADER) {
        None | Some("") | Some("user") => Role::User,
        Some("admin") => Role::Admin,
        Some(_) => return Err(CommerceError::Unauthenticated),
    };
    Ok(Caller { user_id, role })
}

/// Any signed-in caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_from(parts).map(Self)
    }
}

/// A signed-in administrator.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AdminUser {
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller = caller_from(parts)?;
        if !caller.is_admin() {
            return Err(CommerceError::Forbidden("admin access required".into()));
        }
        Ok(Self(caller))
    }
}

/// `Json` whose rejections use the service's error body.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = CommerceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| CommerceError::Validation(e.body_text()))?;
        Ok(Self(value))
    }
}
