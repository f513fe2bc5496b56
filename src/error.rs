//! Error types for apptrack.

use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Classifier error: {0}")]
    Classify(#[from] ClassifyError),
}

/// Durable-state errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox fetch errors.
///
/// `Transient` never marks messages as permanently skipped — the next
/// run re-attempts the same window.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    #[error("Failed to parse message {id}: {reason}")]
    Parse { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification-service errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Transient classifier failure: {0}")]
    Transient(String),

    #[error("Classifier rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error("Classifier authentication failed")]
    Auth,
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
