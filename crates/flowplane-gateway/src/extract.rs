//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use flowplane_auth::{bearer_token, Principal};
use flowplane_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the delegated user id for machine principals.
pub const ON_BEHALF_OF_HEADER: &str = "on-behalf-of";

/// The verified request principal.
///
/// Accepts the token from the `Authorization: Bearer` header or, for
/// WebSocket upgrades, from the `?token=` query parameter (equivalent
/// trust).
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_token(auth_header, parts.uri.query())
            .ok_or_else(|| ApiError::Unauthenticated("missing_token".into()))?;

        let principal = state.verifier.verify(&token).await?;
        Ok(Self(principal))
    }
}

/// The optional `on-behalf-of` header, parsed as a user id.
#[derive(Debug, Clone, Copy)]
pub struct OnBehalfOf(pub Option<UserId>);

impl FromRequestParts<AppState> for OnBehalfOf {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(ON_BEHALF_OF_HEADER) else {
            return Ok(Self(None));
        };

        let user_id = value
            .to_str()
            .ok()
            .and_then(|s| s.parse::<UserId>().ok())
            .ok_or_else(|| ApiError::Invalid("on-behalf-of must be a UUID".into()))?;
        Ok(Self(Some(user_id)))
    }
}
