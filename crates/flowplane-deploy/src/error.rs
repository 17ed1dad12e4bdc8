//! Deployment engine errors and the transient/hard classification that
//! drives the retry policy.

use thiserror::Error;

use flowplane_core::{AgentId, DeploymentId, VersionId};
use flowplane_store::{DeploymentStatus, StoreError};

/// A result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the deployment engine and its workers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The agent does not exist.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// The version does not exist.
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    /// The deployment does not exist.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    /// The version does not belong to the named agent.
    #[error("version {version_id} does not belong to agent {agent_id}")]
    VersionMismatch {
        /// The requested version.
        version_id: VersionId,
        /// The requested agent.
        agent_id: AgentId,
    },

    /// The principal may not access this deployment.
    #[error("forbidden")]
    Forbidden,

    /// The request payload failed validation.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The deployment is in a state that does not admit the operation.
    #[error("deployment is {status:?}")]
    InvalidState {
        /// Current status.
        status: DeploymentStatus,
    },

    /// The remote build reported failure. Hard: fails the pipeline.
    #[error("build failed: {0}")]
    BuildFailed(String),

    /// The image tag is absent from the registry. Hard.
    #[error("image not found in registry: {0}")]
    ImageMissing(String),

    /// The image lacks a platform required by the deploy target. Hard.
    #[error("image incompatible with deploy target: {0}")]
    ImageIncompatible(String),

    /// A transient external failure (timeout, connect error, 5xx, 429).
    /// Retried with backoff up to the stage deadline.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// A hard external failure (4xx other than 429). Not retried.
    #[error("upstream rejected request: {0}")]
    External(String),

    /// The stage or pipeline deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Stop was requested; the worker unwinds and tears down.
    #[error("stop requested")]
    Cancelled,

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the retry policy may retry this failure within a stage.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Store(_))
    }

    /// Classify an HTTP response status from an external service.
    #[must_use]
    pub fn from_status(status: u16, context: &str) -> Self {
        if status == 429 || status >= 500 {
            Self::Transient(format!("{context}: status {status}"))
        } else {
            Self::External(format!("{context}: status {status}"))
        }
    }

    /// Classify a transport-level error (always transient).
    #[must_use]
    pub fn from_transport(err: &reqwest::Error, context: &str) -> Self {
        Self::Transient(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(EngineError::from_status(500, "build").is_transient());
        assert!(EngineError::from_status(503, "build").is_transient());
        assert!(EngineError::from_status(429, "build").is_transient());
        assert!(!EngineError::from_status(404, "build").is_transient());
        assert!(!EngineError::from_status(400, "build").is_transient());
        assert!(!EngineError::from_status(403, "build").is_transient());
    }

    #[test]
    fn hard_failures_are_not_transient() {
        assert!(!EngineError::BuildFailed("compile error".into()).is_transient());
        assert!(!EngineError::ImageMissing("tag".into()).is_transient());
        assert!(!EngineError::Cancelled.is_transient());
    }
}
