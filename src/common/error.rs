//! Error types for warren

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Store ===
    #[error("Key {0} does not exist")]
    KeyNotFound(String),

    #[error("Bucket {0} does not exist")]
    BucketNotFound(String),

    #[error("Lock {0} is not held")]
    LockNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Crypto ===
    #[error("crypto error: {0}")]
    Crypto(String),

    // === Cluster ===
    #[error("replication error: {0}")]
    Replication(String),

    // === Requests ===
    #[error("{0}")]
    BadRequest(String),

    // === Config ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to an HTTP status code.
    ///
    /// Individual handlers override this where the route semantics demand
    /// it (a missing bucket chain on the single-key read path is a server
    /// error, not a 404).
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::KeyNotFound(_) | Error::BucketNotFound(_) | Error::LockNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::BadRequest(_) | Error::Crypto(_) | Error::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
