//! Error types shared across the pipeline crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the shared pipeline plumbing.
#[derive(Error, Debug)]
pub enum Error {
    /// Kafka client error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// AT-URI parse error.
    #[error("invalid at-uri: {0}")]
    InvalidAtUri(String),

    /// Perceptual-hash encoding error.
    #[error("invalid perceptual hash: {0}")]
    InvalidHash(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
