//! Catalog errors.

use thiserror::Error;

use flowplane_core::{AgentId, VersionId};
use flowplane_store::StoreError;

/// A result type using [`CatalogError`].
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors produced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The agent name is empty or otherwise invalid.
    #[error("invalid agent name")]
    InvalidName,

    /// The configuration document exceeds the size cap.
    #[error("configuration exceeds {limit} bytes")]
    PayloadTooLarge {
        /// The configured cap in bytes.
        limit: usize,
    },

    /// The requested agent was not found.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// The requested version was not found.
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    /// The principal may not access this resource.
    #[error("forbidden")]
    Forbidden,

    /// The agent is archived; no new versions can be created.
    #[error("agent {0} is archived")]
    Archived(AgentId),

    /// The write conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => Self::Conflict(constraint),
            other => Self::Store(other),
        }
    }
}
