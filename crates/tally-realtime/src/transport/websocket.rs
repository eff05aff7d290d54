//! WebSocket transport over `tokio-tungstenite`.
//!
//! After the handshake a pump task owns the socket and shuttles text frames
//! between it and the [`TransportLink`] channels, in the same shape as a
//! request/response handler loop: one `select!` over the outbound channel
//! and the socket read half.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Message, handshake::client::Request};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

use super::{ConnectRequest, Connector, TransportLink};
use crate::errors::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channel capacities for WebSocket links.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Frames queued for writing before sends start dropping.
    pub outbound_buffer: usize,
    /// Frames read but not yet consumed by the session.
    pub inbound_buffer: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            inbound_buffer: 256,
        }
    }
}

impl From<&tally_settings::RealtimeSettings> for WebSocketConfig {
    fn from(settings: &tally_settings::RealtimeSettings) -> Self {
        Self {
            outbound_buffer: settings.outbound_buffer.max(1),
            inbound_buffer: settings.inbound_buffer.max(1),
        }
    }
}

/// Opens `ws://` and `wss://` connections.
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Connector with the given channel capacities.
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

/// Build the HTTP upgrade request, attaching the bearer credential.
fn build_request(request: &ConnectRequest) -> Result<Request, TransportError> {
    let invalid = |reason: String| TransportError::InvalidRequest {
        url: request.url.clone(),
        reason,
    };

    let mut http = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;

    if let Some(value) = request.authorization() {
        let value = HeaderValue::from_str(&value)
            .map_err(|_| invalid("access token is not a valid header value".into()))?;
        let _ = http.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(http)
}

#[async_trait]
impl Connector for WebSocketConnector {
    #[instrument(skip_all, fields(url = %request.url))]
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError> {
        let http = build_request(&request)?;
        let (ws, response) =
            connect_async(http)
                .await
                .map_err(|e| TransportError::Handshake {
                    url: request.url.clone(),
                    reason: e.to_string(),
                })?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_buffer);
        drop(tokio::spawn(pump(ws, outbound_rx, inbound_tx)));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Shuttle frames until either side goes away.
///
/// Exits when the session drops the outbound sender (a Close frame is sent
/// first), when the session drops the inbound receiver, or when the socket
/// closes or errors. Exiting drops `inbound`, which the session reads as
/// "transport closed".
async fn pump(ws: WsStream, mut outbound: mpsc::Receiver<String>, inbound: mpsc::Sender<String>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    debug!("link released, closing socket");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!("socket write failed: {e}");
                    break;
                }
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(t))) => t.as_str().to_owned(),
                    // Some servers send JSON in binary frames
                    Some(Ok(Message::Binary(data))) => {
                        if let Ok(s) = std::str::from_utf8(&data) {
                            s.to_owned()
                        } else {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed the socket");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("socket read failed: {e}");
                        break;
                    }
                    None => break,
                };
                if inbound.send(text).await.is_err() {
                    debug!("session released the link");
                    break;
                }
            }
        }
    }
}
