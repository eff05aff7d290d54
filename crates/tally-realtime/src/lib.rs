//! # tally-realtime
//!
//! The group-scoped realtime messaging session of the Tally client.
//!
//! One [`RealtimeSession`] owns at most one transport connection for the
//! whole application. Exactly one group is "active" at a time: it is the
//! destination of outbound messages and the filter for inbound ones, which
//! are handed to a single registered [`GroupMessageListener`].
//!
//! - [`session`]: the connection state machine and delivery filter
//! - [`protocol`]: JSON frames exchanged over the socket
//! - [`transport`]: the [`Connector`] seam, the `tokio-tungstenite`
//!   implementation, and an in-memory implementation for tests (`test-util`)
//! - [`auth`]: access-token suppliers queried once per connect
//! - [`history`]: REST client for the chat history that seeds a chat view

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod history;
pub mod listener;
pub mod protocol;
pub mod session;
pub mod transport;

pub use auth::{AuthTokens, FileTokenSupplier, StaticTokenSupplier, TokenSupplier};
pub use errors::{HistoryError, TransportError};
pub use history::{ChatMessage, Expense, GroupHistory, HistoryClient, TimelineItem};
pub use listener::{ChannelListener, GroupMessageListener};
pub use protocol::{FrameError, FrameKind, InboundFrame, OutboundFrame};
pub use session::{ConnectionState, RealtimeSession};
pub use transport::websocket::{WebSocketConfig, WebSocketConnector};
pub use transport::{ConnectRequest, Connector, TransportLink};
