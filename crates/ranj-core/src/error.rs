//! Error types for ranj.

use thiserror::Error;

/// Result type alias using ranj's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ranj operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Link not found (or not owned by the caller)
    #[error("Link not found: {0}")]
    LinkNotFound(uuid::Uuid),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Fetching or parsing page metadata failed
    #[error("Scrape error: {0}")]
    Scrape(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (malformed cursor, bad tag id, out-of-range limit)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Cache backend failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A claimed job whose lock now belongs to a different execution.
    pub fn lock_lost(job_id: uuid::Uuid) -> Self {
        Error::Job(format!(
            "Job {} is no longer owned by this execution",
            job_id
        ))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
