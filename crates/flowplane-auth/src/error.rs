//! Authentication and authorization errors.

use thiserror::Error;

/// A result type using [`AuthError`].
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors produced while verifying tokens or checking permissions.
///
/// Public messages stay within the coarse categories exposed by
/// [`AuthError::code`]; which specific verification step failed is never
/// leaked beyond them.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is expired (beyond the allowed clock skew).
    #[error("token expired")]
    TokenExpired,

    /// The token is not yet valid (`nbf` in the future).
    #[error("token not yet valid")]
    NotYetValid,

    /// The signature did not verify against the family secret.
    #[error("invalid signature")]
    InvalidSignature,

    /// The issuer did not match the configured family.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// The audience did not match the configured family.
    #[error("invalid audience")]
    InvalidAudience,

    /// A required claim is missing.
    #[error("missing claim: {0}")]
    MissingClaim(String),

    /// The `sub` claim is not a UUID.
    #[error("invalid subject")]
    InvalidSubject,

    /// The token is malformed or matches neither token family.
    #[error("invalid token")]
    InvalidToken(String),

    /// The principal lacks the required permission.
    #[error("missing permission: {permission}")]
    Forbidden {
        /// The permission that was required.
        permission: String,
    },

    /// The role/permission backend failed.
    #[error("role source error: {0}")]
    RoleSource(String),

    /// Token encoding failed.
    #[error("token minting error: {0}")]
    Minting(String),
}

impl AuthError {
    /// Coarse category code safe to expose in API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TokenExpired => "expired",
            Self::InvalidSignature => "bad_signature",
            Self::InvalidAudience => "wrong_audience",
            Self::Forbidden { .. } => "forbidden",
            Self::NotYetValid
            | Self::InvalidIssuer
            | Self::MissingClaim(_)
            | Self::InvalidSubject
            | Self::InvalidToken(_) => "invalid_token",
            Self::RoleSource(_) | Self::Minting(_) => "internal",
        }
    }

    /// Whether this error means "authenticated but not allowed".
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_stay_coarse() {
        assert_eq!(AuthError::TokenExpired.code(), "expired");
        assert_eq!(AuthError::InvalidSignature.code(), "bad_signature");
        assert_eq!(AuthError::InvalidAudience.code(), "wrong_audience");
        assert_eq!(AuthError::MissingClaim("roles".into()).code(), "invalid_token");
        assert_eq!(AuthError::InvalidIssuer.code(), "invalid_token");
    }
}
