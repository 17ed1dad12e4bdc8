//! Conversation service errors.

use thiserror::Error;

use flowplane_core::ConversationId;
use flowplane_store::StoreError;

/// A result type using [`ConversationError`].
pub type Result<T> = std::result::Result<T, ConversationError>;

/// Errors produced by conversation operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// The conversation does not exist.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    /// The principal may not access this conversation.
    #[error("forbidden")]
    Forbidden,

    /// The request payload failed validation.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
