//! In-memory transport for exercising a session without a network.
//!
//! Every `connect` is recorded. In held mode each handshake waits until the
//! test accepts or rejects it, which makes the `Connecting` window
//! observable. Established links surface as [`MemoryPeer`]s playing the
//! server side.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ConnectRequest, Connector, TransportLink};
use crate::errors::TransportError;

const PEER_BUFFER: usize = 64;

enum Handshake {
    Accept,
    Reject(String),
}

struct Shared {
    held: bool,
    waiting: AtomicUsize,
    requests: Mutex<Vec<ConnectRequest>>,
    peers: Mutex<VecDeque<MemoryPeer>>,
    release_tx: mpsc::UnboundedSender<Handshake>,
    release_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Handshake>>,
}

/// A [`Connector`] backed by in-process channels.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Handshakes complete immediately.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Handshakes wait for [`accept_next`](Self::accept_next) or
    /// [`reject_next`](Self::reject_next), in call order.
    pub fn held() -> Self {
        Self::build(true)
    }

    fn build(held: bool) -> Self {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                held,
                waiting: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                peers: Mutex::new(VecDeque::new()),
                release_tx,
                release_rx: tokio::sync::Mutex::new(release_rx),
            }),
        }
    }

    /// Let the oldest pending handshake succeed.
    pub fn accept_next(&self) {
        let _ = self.shared.release_tx.send(Handshake::Accept);
    }

    /// Fail the oldest pending handshake.
    pub fn reject_next(&self, reason: impl Into<String>) {
        let _ = self.shared.release_tx.send(Handshake::Reject(reason.into()));
    }

    /// Number of transports constructed so far.
    pub fn attempts(&self) -> usize {
        self.shared.requests.lock().len()
    }

    /// Held handshakes still waiting for a verdict. A handshake whose
    /// caller gave up stops counting.
    pub fn pending(&self) -> usize {
        self.shared.waiting.load(Ordering::SeqCst)
    }

    /// Every request seen, oldest first.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.shared.requests.lock().clone()
    }

    /// Take the server side of the oldest established link.
    pub fn take_peer(&self) -> Option<MemoryPeer> {
        self.shared.peers.lock().pop_front()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError> {
        let url = request.url.clone();
        self.shared.requests.lock().push(request);

        if self.shared.held {
            let _waiting = Waiting::enter(&self.shared.waiting);
            let outcome = self.shared.release_rx.lock().await.recv().await;
            match outcome {
                Some(Handshake::Accept) => {}
                Some(Handshake::Reject(reason)) => {
                    return Err(TransportError::Handshake { url, reason });
                }
                None => {
                    return Err(TransportError::Handshake {
                        url,
                        reason: "connector dropped".into(),
                    });
                }
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(PEER_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(PEER_BUFFER);
        self.shared.peers.lock().push_back(MemoryPeer {
            sent: outbound_rx,
            inject: inbound_tx,
        });
        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        let _ = count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The server end of an in-memory link.
pub struct MemoryPeer {
    sent: mpsc::Receiver<String>,
    inject: mpsc::Sender<String>,
}

impl MemoryPeer {
    /// Wait for the next frame the client wrote. `None` once the client
    /// has dropped the link and every frame has been read.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = self.sent.recv().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Every frame written so far, without waiting.
    pub fn drain_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap_or(Value::String(text)));
        }
        frames
    }

    /// Wait until the client drops its end. Pending frames are discarded.
    pub async fn wait_closed_by_client(&mut self) {
        while self.sent.recv().await.is_some() {}
    }

    /// Whether the client has stopped reading this link.
    pub fn is_client_gone(&self) -> bool {
        self.inject.is_closed()
    }

    /// Deliver a raw text frame to the client.
    pub async fn push(&self, text: impl Into<String>) -> bool {
        self.inject.send(text.into()).await.is_ok()
    }

    /// Close the link from the server side.
    pub fn close(self) {
        drop(self);
    }
}
