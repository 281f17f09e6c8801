//! Common error types for Carte

use thiserror::Error;

/// Common result type for Carte operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Carte services
///
/// Only `Config` aborts a run: missing credentials, an unreadable data
/// directory, or an invalid TOML file are the operator's problem to fix
/// before anything useful can happen. Everything else is reported per
/// brand/source pair and never escalates past the pair it belongs to.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON column or payload failed to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
