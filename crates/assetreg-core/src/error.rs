//! Error types for assetreg.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using assetreg's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for assetreg operations.
///
/// Expected outcomes of the OCR pipeline (a provider rejecting a start
/// request, a failed OCR run, a lost claim race) are not errors; they are
/// ordinary return values. This type covers infrastructure faults and
/// programming/configuration mistakes.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// OCR job not found
    #[error("OCR job not found: {0}")]
    JobNotFound(Uuid),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    /// OCR provider returned something unusable (malformed response, HTTP error status)
    #[error("Provider error: {0}")]
    Provider(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A job was asked to move along a transition its status does not allow
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is an infrastructure fault worth retrying after a backoff.
    ///
    /// The scheduler treats every error as transient at its loop boundary;
    /// this classification only drives log levels and diagnostics.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Request(_) | Error::Provider(_)
        )
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
