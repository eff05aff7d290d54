//! Session-side handle on an open transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::OutboundFrame;

/// Write half of an open connection, as held by the session.
///
/// Sends never block: a full or closed channel drops the frame and bumps
/// the drop counter. Dropping the link closes the transport.
pub struct OutboundLink {
    tx: mpsc::Sender<String>,
    opened_at: Instant,
    dropped_frames: AtomicU64,
}

impl OutboundLink {
    /// Wrap the outbound channel of a freshly opened transport.
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            opened_at: Instant::now(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Enqueue raw text. Returns `false` if the frame was dropped.
    pub fn send_text(&self, text: String) -> bool {
        if self.tx.try_send(text).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode and enqueue a frame. Returns `false` if the frame was dropped.
    pub fn send_frame(&self, frame: &OutboundFrame) -> bool {
        match frame.encode() {
            Ok(json) => self.send_text(json),
            Err(e) => {
                warn!(kind = frame.kind.as_str(), "failed to encode outbound frame: {e}");
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Frames dropped on this link so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Whether the transport side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Time since the link opened.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::GroupId;

    fn make_link(capacity: usize) -> (OutboundLink, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (OutboundLink::new(tx), rx)
    }

    #[tokio::test]
    async fn send_frame_encodes_json() {
        let (link, mut rx) = make_link(4);
        assert!(link.send_frame(&OutboundFrame::join(GroupId::new(3))));
        let text = rx.recv().await.unwrap();
        assert_eq!(
            text,
            r#"{"type":"join-group","body":"Joining group","group_id":3}"#
        );
    }

    #[test]
    fn send_to_full_channel_counts_drop() {
        let (link, _rx) = make_link(1);
        assert!(link.send_text("a".into()));
        assert!(!link.send_text("b".into()));
        assert_eq!(link.drop_count(), 1);
    }

    #[test]
    fn send_to_closed_channel_counts_drop() {
        let (link, rx) = make_link(4);
        drop(rx);
        assert!(link.is_closed());
        assert!(!link.send_text("a".into()));
        assert_eq!(link.drop_count(), 1);
    }

    #[tokio::test]
    async fn frames_keep_order() {
        let (link, mut rx) = make_link(8);
        for i in 0..3 {
            assert!(link.send_text(format!("f{i}")));
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), format!("f{i}"));
        }
    }

    #[test]
    fn age_increases() {
        let (link, _rx) = make_link(1);
        let a = link.age();
        std::thread::sleep(Duration::from_millis(5));
        assert!(link.age() > a);
    }
}
