//! Error types for the enricher.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from enrichment clients and the enricher loop.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 response from an enrichment service.
    #[error("{service} request failed statusCode={status}")]
    UnexpectedStatus {
        service: &'static str,
        status: reqwest::StatusCode,
    },

    /// Response body parse failure.
    #[error("failed to parse response JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The identity directory has no audit log for the DID.
    #[error("audit log not found for DID")]
    AuditLogNotFound,

    /// The DID method cannot be resolved by this client.
    #[error("unsupported DID: {0}")]
    UnsupportedDid(String),

    /// The per-event dispatch budget elapsed mid-call.
    #[error("dispatch budget elapsed")]
    BudgetElapsed,

    /// Shared plumbing error (bus, JSON).
    #[error(transparent)]
    Core(#[from] tern_core::Error),
}
