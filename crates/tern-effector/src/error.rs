//! Error types for the effector.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the effector and its clients.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the moderation API.
    #[error("moderation API returned {status}: {body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Session creation or refresh failure.
    #[error("session error: {0}")]
    Session(String),

    /// Memo cache error.
    #[error("memo cache error: {0}")]
    Memo(#[from] memcache::MemcacheError),

    /// Warehouse client error.
    #[error("warehouse error: {0}")]
    Warehouse(#[from] clickhouse::error::Error),

    /// A logger with the same name is already registered.
    #[error("a logger with the name {0} already exists")]
    DuplicateLogger(&'static str),

    /// One or more logger sinks failed.
    #[error("logger failures: {0}")]
    LoggerFailures(String),

    /// Shared plumbing error (bus, at-uri).
    #[error(transparent)]
    Core(#[from] tern_core::Error),
}
