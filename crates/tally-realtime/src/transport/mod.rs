//! Transport abstraction.
//!
//! A [`Connector`] performs one handshake per call and hands back a
//! [`TransportLink`]: a pair of text-frame channels. The session never sees
//! the socket itself, which keeps the state machine independent of
//! `tokio-tungstenite` and testable with an in-memory connector (behind the
//! `test-util` feature).

pub mod link;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod websocket;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;

pub use link::OutboundLink;

/// Parameters of one connection attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Socket endpoint.
    pub url: String,
    /// Access token sent as `Authorization: Bearer <token>`, if any.
    pub bearer: Option<String>,
}

impl ConnectRequest {
    /// Build a request; empty tokens are treated as absent.
    pub fn new(url: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            url: url.into(),
            bearer: bearer.filter(|t| !t.is_empty()),
        }
    }

    /// Value of the `Authorization` header, if a token is present.
    pub fn authorization(&self) -> Option<String> {
        self.bearer.as_ref().map(|token| format!("Bearer {token}"))
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// An established connection, seen as two text-frame channels.
///
/// Dropping `outbound` asks the transport to close. `inbound` yielding
/// `None` means the transport has closed, for whatever reason.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to write to the peer.
    pub outbound: mpsc::Sender<String>,
    /// Frames read from the peer.
    pub inbound: mpsc::Receiver<String>,
}

/// Establishes transport connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Construct one transport and run its handshake.
    ///
    /// No timeout is applied here; wrap the session's caller if a bounded
    /// wait is needed.
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_header_value() {
        let req = ConnectRequest::new("wss://x", Some("abc".into()));
        assert_eq!(req.authorization().as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn empty_token_is_absent() {
        let req = ConnectRequest::new("wss://x", Some(String::new()));
        assert!(req.bearer.is_none());
        assert!(req.authorization().is_none());
    }

    #[test]
    fn debug_redacts_token() {
        let req = ConnectRequest::new("wss://x", Some("secret".into()));
        let printed = format!("{req:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("<redacted>"));
    }
}
