//! Error types for the converter.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while converting the firehose.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket transport error. Fatal for the subscription.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay sent an error frame. Fatal for the subscription.
    #[error("firehose error frame: {0}")]
    Stream(String),

    /// The subscription ended without an error frame.
    #[error("firehose stream closed")]
    StreamClosed,

    /// Frame- or record-level CBOR decode failure. Never fatal.
    #[error("cbor decode error: {0}")]
    Cbor(String),

    /// CAR archive decode failure. Never fatal.
    #[error("car decode error: {0}")]
    Car(String),

    /// A record op referenced a block missing from the commit's CAR archive.
    #[error("record block {0} not found in archive")]
    MissingBlock(String),

    /// The decoded record's recomputed address differs from the declared one.
    #[error("record cid mismatch: expected {expected}, actual {actual}")]
    CidMismatch { expected: String, actual: String },

    /// A commit op declared no content-address for a non-delete operation.
    #[error("record op missing cid")]
    MissingCid,

    /// Malformed record path (expected `<collection>/<rkey>`).
    #[error("malformed record path: {0}")]
    BadPath(String),

    /// A commit op carried an action outside create/update/delete.
    #[error("unknown op action: {0}")]
    UnknownAction(String),

    /// The worker pool has shut down.
    #[error("scheduler stopped")]
    SchedulerStopped,

    /// Shared plumbing error (bus, JSON).
    #[error(transparent)]
    Core(#[from] tern_core::Error),
}
