//! The API error envelope.
//!
//! Every error renders as `{"detail": "<message>"}` with the status
//! mapping: `invalid_input` 400, `unauthenticated` 401, `forbidden` 403,
//! `not_found` 404, `conflict` 409, `precondition_failed` 412, payload
//! cap 413, `transient_unavailable` 503, `timeout` 504, `internal` 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use flowplane_auth::AuthError;
use flowplane_catalog::CatalogError;
use flowplane_conversation::ConversationError;
use flowplane_deploy::EngineError;
use flowplane_identity::IdentityError;
use flowplane_store::StoreError;

/// API-level error with the standard envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400.
    #[error("{0}")]
    Invalid(String),

    /// 401; the message stays within the coarse verifier categories.
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// 403.
    #[error("forbidden")]
    Forbidden,

    /// 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// 409.
    #[error("{0}")]
    Conflict(String),

    /// 412.
    #[error("{0}")]
    PreconditionFailed(String),

    /// 413.
    #[error("payload too large")]
    PayloadTooLarge,

    /// 503.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// 504.
    #[error("upstream timeout")]
    Timeout,

    /// 500; the public message never carries internals.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            Self::Internal(inner) => {
                tracing::error!(error = %inner, "Internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_forbidden() {
            return Self::Forbidden;
        }
        match &err {
            AuthError::RoleSource(inner) | AuthError::Minting(inner) => {
                Self::Internal(inner.clone())
            }
            _ => Self::Unauthenticated(err.code().to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("resource".into()),
            StoreError::Conflict(constraint) => Self::Conflict(constraint),
            StoreError::InvalidInput(message) => Self::Invalid(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Invalid(message) => Self::Invalid(message),
            IdentityError::NotFound(what) => Self::NotFound(what),
            IdentityError::Conflict(message) => Self::Conflict(message),
            IdentityError::InvalidCredentials | IdentityError::ClientRevoked => {
                Self::Unauthenticated("invalid_client".into())
            }
            IdentityError::Provider(message) => Self::Unavailable(message),
            IdentityError::Auth(inner) => inner.into(),
            IdentityError::Store(inner) => inner.into(),
            IdentityError::Hashing(inner) => Self::Internal(inner),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InvalidName => Self::Invalid("agent name must not be empty".into()),
            CatalogError::PayloadTooLarge { .. } => Self::PayloadTooLarge,
            CatalogError::AgentNotFound(id) => Self::NotFound(format!("agent {id}")),
            CatalogError::VersionNotFound(id) => Self::NotFound(format!("version {id}")),
            CatalogError::Forbidden => Self::Forbidden,
            CatalogError::Archived(id) => Self::Conflict(format!("agent {id} is archived")),
            CatalogError::Conflict(message) => Self::Conflict(message),
            CatalogError::Store(inner) => inner.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::AgentNotFound(id) => Self::NotFound(format!("agent {id}")),
            EngineError::VersionNotFound(id) => Self::NotFound(format!("version {id}")),
            EngineError::DeploymentNotFound(id) => Self::NotFound(format!("deployment {id}")),
            EngineError::VersionMismatch { .. } | EngineError::Invalid(_) => {
                Self::Invalid(err.to_string())
            }
            EngineError::Forbidden => Self::Forbidden,
            EngineError::InvalidState { .. } => Self::Conflict(err.to_string()),
            EngineError::Transient(message) => Self::Unavailable(message),
            EngineError::Timeout(_) => Self::Timeout,
            EngineError::Store(inner) => inner.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::NotFound(id) => Self::NotFound(format!("conversation {id}")),
            ConversationError::Forbidden => Self::Forbidden,
            ConversationError::Invalid(message) => Self::Invalid(message),
            ConversationError::Store(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_contract() {
        assert_eq!(
            ApiError::Invalid("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("expired".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::PreconditionFailed("x".into()).status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ApiError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn auth_errors_stay_coarse() {
        let err: ApiError = AuthError::InvalidSignature.into();
        assert!(matches!(err, ApiError::Unauthenticated(code) if code == "bad_signature"));

        let err: ApiError = AuthError::Forbidden {
            permission: "admin:manage".into(),
        }
        .into();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[test]
    fn payload_cap_maps_to_413() {
        let err: ApiError = CatalogError::PayloadTooLarge { limit: 1024 }.into();
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
