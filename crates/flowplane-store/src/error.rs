//! Storage error types.

use thiserror::Error;

/// A result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the storage layer.
///
/// Database constraint violations are translated here so callers never see
/// driver-specific error codes: unique violations become [`StoreError::Conflict`]
/// and check/not-null violations become [`StoreError::InvalidInput`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A check or not-null constraint rejected the write.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored JSON document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The database driver reported an error.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Translate an `sqlx` error into a [`StoreError`].
    #[must_use]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // unique_violation
                Some("23505") => Self::Conflict(
                    db.constraint().unwrap_or("unique constraint").to_string(),
                ),
                // check_violation / not_null_violation
                Some("23514" | "23502") => Self::InvalidInput(db.message().to_string()),
                _ => Self::Database(err.to_string()),
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}
