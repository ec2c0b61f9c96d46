//! Error types for the trustflow-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint rejected the write.
    ///
    /// For the execution log this is the authoritative "already happened"
    /// signal: the partial unique index on `idempotency_key` turns a
    /// concurrent double-insert into this error instead of a second row.
    #[error("{entity} already exists for key: {key}")]
    Conflict { entity: &'static str, key: String },

    /// A state transition was rejected (e.g. resolving a review twice).
    #[error("invalid transition for {entity} {id}: {message}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        message: String,
    },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
