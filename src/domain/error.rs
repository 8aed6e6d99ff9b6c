//! Domain-level error types for guild-backup.
//!
//! All errors are typed with `thiserror`. Whether an error aborts a run is
//! decided by the caller: per-source and per-file failures are logged and
//! swallowed, everything else surfaces to the trigger.

use std::path::PathBuf;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// The remote platform rejected or failed a request.
    #[error("HTTP error: {message}")]
    Http {
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The remote platform returned something we could not use.
    #[error("Remote error: {message}")]
    Remote { message: String },

    /// Invalid or corrupted data.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Packing the run directory into an archive failed.
    #[error("Archive error for {path}: {message}")]
    Archive { path: PathBuf, message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create an HTTP error from a transport failure.
    pub fn http(message: impl Into<String>, err: reqwest::Error) -> Self {
        Self::Http {
            message: message.into(),
            status: err.status().map(|s| s.as_u16()),
            source: Some(err),
        }
    }

    /// Create an HTTP error for a non-success status code.
    pub fn http_status(message: impl Into<String>, status: u16) -> Self {
        Self::Http {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Create a JSON error.
    pub fn json(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Create an archive error.
    pub fn archive(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
