//! Consumers of inbound group messages.
//!
//! The session holds at most one listener. A chat view attaches itself when
//! it becomes visible and detaches when it goes away; attaching a new
//! listener silently replaces the previous one.

use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::InboundFrame;

/// Default capacity of a [`ChannelListener`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Receives chat messages for the active group.
///
/// Called from the connection task, outside the session lock, so
/// implementations may call back into the session. Keep it cheap.
pub trait GroupMessageListener: Send + Sync {
    /// A `"message"` frame for the active group arrived.
    fn on_group_message(&self, frame: &InboundFrame);
}

impl<F> GroupMessageListener for F
where
    F: Fn(&InboundFrame) + Send + Sync,
{
    fn on_group_message(&self, frame: &InboundFrame) {
        self(frame);
    }
}

/// Forwards messages into a bounded channel the consumer drains.
///
/// Frames that do not fit are dropped with a warning.
pub struct ChannelListener {
    tx: mpsc::Sender<InboundFrame>,
}

impl ChannelListener {
    /// Create a listener and the receiver it feeds.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl GroupMessageListener for ChannelListener {
    fn on_group_message(&self, frame: &InboundFrame) {
        if let Err(e) = self.tx.try_send(frame.clone()) {
            warn!(group_id = %frame.group_id(), "dropping inbound message: {e}");
        }
    }
}
