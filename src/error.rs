//! Error types for the whereis gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the dispatch core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller supplied something unusable
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Uniqueness constraint violated (endpoint, SMS PIN)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
