//! Identity service errors.

use thiserror::Error;

use flowplane_store::StoreError;

/// A result type using [`IdentityError`].
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Errors produced by identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Request payload failed validation.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write conflicts with existing state (duplicate email, role
    /// name, client name, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Client id or secret did not verify, or the user's provider
    /// credentials were rejected.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The machine client has been revoked.
    #[error("client revoked")]
    ClientRevoked,

    /// The external identity provider rejected or failed the call.
    #[error("identity provider error: {0}")]
    Provider(String),

    /// Secret hashing failed.
    #[error("hashing error: {0}")]
    Hashing(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Token minting failed.
    #[error(transparent)]
    Auth(#[from] flowplane_auth::AuthError),
}

impl IdentityError {
    /// Collapse store conflicts into identity conflicts with a stable
    /// public message.
    #[must_use]
    pub fn from_store(err: StoreError, what: &str) -> Self {
        match err {
            StoreError::Conflict(_) => Self::Conflict(what.to_string()),
            StoreError::NotFound => Self::NotFound(what.to_string()),
            other => Self::Store(other),
        }
    }
}
