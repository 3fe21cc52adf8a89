//! Client-side error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for fallible client operations.
pub type Result<T> = std::result::Result<T, ApnsError>;

/// Errors produced by the client itself, as opposed to failures reported
/// by APNs (those are [`crate::FatalReason`] / [`crate::TemporaryReason`]).
#[derive(Debug, Error)]
pub enum ApnsError {
    /// The session has been closed; no further sends are accepted.
    #[error("session is closed")]
    SessionClosed,

    /// The connection has been closed and must not be reused.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Credential or trust-store material could not be loaded.
    #[error("credential error: {0}")]
    Credentials(String),

    /// The TLS layer rejected the configuration or handshake.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP/2 protocol error.
    #[error("HTTP/2 error: {0}")]
    Http2(#[from] h2::Error),

    /// The response body was not the JSON shape APNs documents.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request component (URI, header value) could not be constructed.
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    /// The per-send deadline elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ApnsError {
    /// Check if this error means the session or connection is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::ConnectionClosed)
    }
}
