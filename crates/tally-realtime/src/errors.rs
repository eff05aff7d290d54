//! Error types for transport establishment and history fetches.
//!
//! Session operations themselves never fail: transport errors are absorbed
//! by the state machine and only logged.

use thiserror::Error;

/// Errors establishing a transport connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The URL or headers could not form a valid handshake request.
    #[error("invalid connect request for {url}: {reason}")]
    InvalidRequest {
        /// Target URL.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The handshake was attempted and failed.
    #[error("handshake with {url} failed: {reason}")]
    Handshake {
        /// Target URL.
        url: String,
        /// Failure reported by the transport.
        reason: String,
    },
}

/// Errors fetching chat history over REST.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered but refused the request.
    #[error("history request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message returned by the server.
        message: String,
    },

    /// A successful response carried no `data` object.
    #[error("history response has no data")]
    MissingData,
}
