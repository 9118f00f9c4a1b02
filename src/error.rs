//! Error types for the memory component.

/// Errors that can occur in memory operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session key is empty or whitespace-only. Rejected before any I/O.
    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    /// Save payload carries neither input nor output text.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// Remote backend unreachable during `load` with no recent-turn fallback.
    #[error("retrieval backend unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Remote backend call failed (degraded wherever a local fallback exists).
    #[error("backend error: {0}")]
    Backend(String),

    /// Remote backend call exceeded the configured timeout.
    #[error("backend call timed out after {0}s")]
    Timeout(u64),

    /// SQLite database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
