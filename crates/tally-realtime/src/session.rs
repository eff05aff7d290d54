//! The realtime session manager.
//!
//! One [`RealtimeSession`] owns at most one transport for the lifetime of
//! the application. It tracks a single active group: outbound messages go to
//! it, and inbound messages are only handed to the listener when their
//! `group_id` matches it.
//!
//! # State machine
//!
//! ```text
//!            connect()                 handshake ok
//!   Idle ─────────────────▶ Connecting ─────────────▶ Open
//!    ▲                          │                       │
//!    │      handshake failed    │   disconnect() or     │
//!    └──────────────────────────┴───────────────────────┘
//!                          transport closed
//! ```
//!
//! Entering `Idle` from any other state clears the active group, the
//! pending join and the listener: group context belongs to the connection
//! that carried it.
//!
//! A join requested while not `Open` is remembered (`join_pending`) and
//! replayed exactly once when the connection opens, so join-then-connect
//! and connect-then-join look the same to the server.
//!
//! # Concurrency
//!
//! All state sits behind one `parking_lot::Mutex` and every operation is a
//! short synchronous critical section. The connection task only awaits the
//! token lookup, the handshake and inbound frames. Each connection attempt
//! gets a generation number; anything a superseded attempt reports is
//! ignored. Returning to `Idle` aborts the attempt's task, so an abandoned
//! handshake never overlaps the next one.
//!
//! The listener runs outside the state lock but under a reentrant delivery
//! lock. [`RealtimeSession::disconnect`] and
//! [`RealtimeSession::set_message_listener`] take that lock too: once either
//! returns, the old listener is not running and will not be called again,
//! on any runtime flavor. A listener may call back into the session from
//! its own thread.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, trace, warn};

use tally_core::GroupId;

use crate::auth::TokenSupplier;
use crate::listener::{ChannelListener, DEFAULT_CHANNEL_CAPACITY, GroupMessageListener};
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::transport::{ConnectRequest, Connector, OutboundLink, TransportLink};

/// Connection lifecycle as seen by the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection, and none being attempted.
    #[default]
    Idle,
    /// Credential lookup or handshake in flight.
    Connecting,
    /// Transport established.
    Open,
}

impl ConnectionState {
    /// Lowercase name for logs and display.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct SessionState {
    phase: ConnectionState,
    generation: u64,
    link: Option<OutboundLink>,
    active_group: Option<GroupId>,
    join_pending: bool,
    listener: Option<Arc<dyn GroupMessageListener>>,
    task: Option<AbortHandle>,
}

impl SessionState {
    fn emit(&self, frame: &OutboundFrame) -> bool {
        self.link.as_ref().is_some_and(|link| link.send_frame(frame))
    }

    /// Drop the link and everything scoped to it.
    fn reset(&mut self) {
        self.phase = ConnectionState::Idle;
        self.link = None;
        self.active_group = None;
        self.join_pending = false;
        self.listener = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenSupplier>,
    state: Mutex<SessionState>,
    delivery: ReentrantMutex<()>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Inner {
    fn publish(&self, phase: ConnectionState) {
        let _ = self.state_tx.send_replace(phase);
    }

    /// `Connecting → Open`. Returns `false` if this attempt was superseded,
    /// in which case the caller drops the link.
    fn open(&self, generation: u64, outbound: mpsc::Sender<String>) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.phase != ConnectionState::Connecting {
            return false;
        }

        state.phase = ConnectionState::Open;
        state.link = Some(OutboundLink::new(outbound));
        info!(generation, "connection open");

        if let (true, Some(group)) = (state.join_pending, state.active_group) {
            state.join_pending = false;
            if state.emit(&OutboundFrame::join(group)) {
                info!(group_id = %group, "replayed deferred group join");
            } else {
                warn!(group_id = %group, "deferred group join could not be sent");
            }
        }

        self.publish(ConnectionState::Open);
        true
    }

    /// Any state → `Idle` for this attempt, unless superseded.
    fn close(&self, generation: u64, reason: &str) {
        let _delivery = self.delivery.lock();
        let mut state = self.state.lock();
        if state.generation != generation || state.phase == ConnectionState::Idle {
            return;
        }
        let group = state.active_group;
        let uptime_ms = state.link.as_ref().map(|link| link.age().as_millis());
        state.reset();
        info!(
            generation,
            reason,
            group_id = ?group.map(GroupId::get),
            uptime_ms = ?uptime_ms,
            "connection closed, group context cleared"
        );
        self.publish(ConnectionState::Idle);
    }

    /// Route one inbound text frame. Returns `false` once this attempt is
    /// stale and the caller should stop reading.
    fn deliver(&self, generation: u64, text: &str) -> bool {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(generation, "discarding malformed inbound frame: {e}");
                return true;
            }
        };

        let _delivery = self.delivery.lock();
        let listener = {
            let state = self.state.lock();
            if state.generation != generation || state.phase != ConnectionState::Open {
                return false;
            }
            if !frame.is_message() {
                trace!(kind = frame.kind(), "ignoring inbound frame type");
                return true;
            }
            if state.active_group != Some(frame.group_id()) {
                trace!(group_id = %frame.group_id(), "ignoring message for inactive group");
                return true;
            }
            let Some(listener) = state.listener.clone() else {
                trace!(group_id = %frame.group_id(), "no listener attached, message dropped");
                return true;
            };
            listener
        };

        listener.on_group_message(&frame);
        true
    }
}

/// Drive one connection attempt from credential lookup to close.
#[instrument(name = "connection", skip(inner, url))]
async fn run_connection(inner: Arc<Inner>, generation: u64, url: String) {
    let bearer = inner.tokens.access_token().await;
    if bearer.is_none() {
        warn!("no access token available, connecting unauthenticated");
    }

    let link = match inner.connector.connect(ConnectRequest::new(url, bearer)).await {
        Ok(link) => link,
        Err(e) => {
            warn!("connection failed: {e}");
            inner.close(generation, "handshake failed");
            return;
        }
    };

    let TransportLink {
        outbound,
        mut inbound,
    } = link;
    if !inner.open(generation, outbound) {
        debug!("handshake finished for a superseded attempt, dropping link");
        return;
    }

    while let Some(text) = inbound.recv().await {
        if !inner.deliver(generation, &text) {
            break;
        }
    }
    inner.close(generation, "transport closed");
}

/// Handle on the application's single realtime session.
///
/// Cheap to clone; all clones share the same connection and state. Create
/// one at the application root and hand clones to whatever needs to chat.
///
/// [`connect`](Self::connect) spawns onto the ambient tokio runtime, so it
/// must be called from within one.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<Inner>,
}

impl RealtimeSession {
    /// New idle session.
    pub fn new(connector: Arc<dyn Connector>, tokens: Arc<dyn TokenSupplier>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                connector,
                tokens,
                state: Mutex::new(SessionState {
                    phase: ConnectionState::Idle,
                    generation: 0,
                    link: None,
                    active_group: None,
                    join_pending: false,
                    listener: None,
                    task: None,
                }),
                delivery: ReentrantMutex::new(()),
                state_tx,
            }),
        }
    }

    /// Start connecting to `url` and return immediately.
    ///
    /// A no-op while already connecting or open: callers share the
    /// existing attempt. Failure is observable only as a return to
    /// [`ConnectionState::Idle`]; there is no automatic retry.
    pub fn connect(&self, url: impl Into<String>) {
        let url = url.into();
        let mut state = self.inner.state.lock();
        if state.phase != ConnectionState::Idle {
            debug!(state = %state.phase, "connect ignored, connection already active");
            return;
        }
        state.generation += 1;
        state.phase = ConnectionState::Connecting;
        let generation = state.generation;
        info!(%url, generation, "connecting");

        // Spawned under the lock so the handle is stored before any
        // disconnect can look for it.
        let task = tokio::spawn(run_connection(Arc::clone(&self.inner), generation, url));
        state.task = Some(task.abort_handle());
        self.inner.publish(ConnectionState::Connecting);
    }

    /// Make `group` the active group.
    ///
    /// When open, a join frame is sent right away (even if `group` was
    /// already active). Otherwise the join is sent once the connection
    /// opens. Any previously active group is replaced without a leave frame.
    pub fn join_group(&self, group: GroupId) {
        let mut state = self.inner.state.lock();
        let previous = state.active_group.replace(group);
        if let Some(previous) = previous.filter(|p| *p != group) {
            debug!(previous = %previous, group_id = %group, "replacing active group");
        }

        if state.phase == ConnectionState::Open {
            state.join_pending = false;
            if state.emit(&OutboundFrame::join(group)) {
                debug!(group_id = %group, "joined group");
            } else {
                warn!(group_id = %group, "join frame could not be sent");
            }
        } else {
            state.join_pending = true;
            debug!(group_id = %group, state = %state.phase, "join deferred until connection opens");
        }
    }

    /// Stop being subscribed to the active group.
    ///
    /// Sends a leave frame if the server was told about the join; with no
    /// active group this does nothing.
    pub fn leave_group(&self) {
        let mut state = self.inner.state.lock();
        let Some(group) = state.active_group.take() else {
            debug!("leave ignored, no active group");
            return;
        };

        let announced = state.phase == ConnectionState::Open && !state.join_pending;
        state.join_pending = false;
        if !announced {
            debug!(group_id = %group, "cleared deferred group join");
        } else if state.emit(&OutboundFrame::leave(group)) {
            debug!(group_id = %group, "left group");
        } else {
            warn!(group_id = %group, "leave frame could not be sent");
        }
    }

    /// Send a chat message to the active group.
    ///
    /// Fire-and-forget: when not open, or with no active group, the message
    /// is dropped. Returns whether it was handed to the transport.
    pub fn send_message(&self, content: impl Into<String>) -> bool {
        let state = self.inner.state.lock();
        if state.phase != ConnectionState::Open {
            debug!(state = %state.phase, "message dropped, connection not open");
            return false;
        }
        let Some(group) = state.active_group else {
            debug!("message dropped, no active group");
            return false;
        };

        let sent = state.emit(&OutboundFrame::message(group, content));
        if !sent {
            let closed = state.link.as_ref().is_some_and(OutboundLink::is_closed);
            warn!(group_id = %group, closed, "message could not be sent");
        }
        sent
    }

    /// Replace the inbound listener. `None` detaches it.
    ///
    /// Waits for a delivery in progress on another thread to finish.
    pub fn set_message_listener(&self, listener: Option<Arc<dyn GroupMessageListener>>) {
        let _delivery = self.inner.delivery.lock();
        let mut state = self.inner.state.lock();
        let attach = listener.is_some();
        let replaced = std::mem::replace(&mut state.listener, listener).is_some();
        debug!(attach, replaced, "message listener updated");
    }

    /// Attach a closure as the inbound listener.
    pub fn on_group_message<F>(&self, listener: F)
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        self.set_message_listener(Some(Arc::new(listener)));
    }

    /// Attach a channel as the inbound listener and return its receiver.
    ///
    /// The receiver yields `None` once the listener is replaced or cleared.
    pub fn subscribe(&self) -> mpsc::Receiver<InboundFrame> {
        let (listener, rx) = ChannelListener::new(DEFAULT_CHANNEL_CAPACITY);
        self.set_message_listener(Some(Arc::new(listener)));
        rx
    }

    /// Close the transport. Idempotent.
    ///
    /// The active group is cleared whatever the state. A handshake still in
    /// flight is cancelled, dropping its transport. Waits for a delivery in
    /// progress on another thread to finish.
    pub fn disconnect(&self) {
        let _delivery = self.inner.delivery.lock();
        let mut state = self.inner.state.lock();
        if state.phase == ConnectionState::Idle {
            state.active_group = None;
            state.join_pending = false;
            debug!("disconnect ignored, not connected");
            return;
        }

        state.generation += 1;
        state.reset();
        info!("disconnected");
        self.inner.publish(ConnectionState::Idle);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The active group, if any.
    pub fn active_group(&self) -> Option<GroupId> {
        self.inner.state.lock().active_group
    }

    /// Whether a listener is attached.
    pub fn has_listener(&self) -> bool {
        self.inner.state.lock().listener.is_some()
    }

    /// Frames dropped on the current link because its buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.inner
            .state
            .lock()
            .link
            .as_ref()
            .map_or(0, OutboundLink::drop_count)
    }
}

impl fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RealtimeSession")
            .field("state", &state.phase)
            .field("generation", &state.generation)
            .field("active_group", &state.active_group)
            .field("join_pending", &state.join_pending)
            .field("has_listener", &state.listener.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
