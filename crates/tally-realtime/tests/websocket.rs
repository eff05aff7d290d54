//! End-to-end tests against a real local WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use tally_core::GroupId;
use tally_realtime::{
    ConnectionState, RealtimeSession, StaticTokenSupplier, WebSocketConnector,
};

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerStream = WebSocketStream<TcpStream>;

/// A server-side connection and the `Authorization` header it arrived with.
struct Accepted {
    ws: ServerStream,
    authorization: Option<String>,
}

/// Bind a local listener that upgrades every connection and hands it over.
async fn boot_server() -> (String, mpsc::Receiver<Accepted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(4);

    drop(tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::new(Mutex::new(None));
            let capture = Arc::clone(&seen);
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                *capture.lock() = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                Ok(resp)
            };
            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                continue;
            };
            let authorization = seen.lock().take();
            if tx.send(Accepted { ws, authorization }).await.is_err() {
                break;
            }
        }
    }));

    (format!("ws://{addr}/ws"), rx)
}

fn session(tokens: StaticTokenSupplier) -> RealtimeSession {
    RealtimeSession::new(Arc::new(WebSocketConnector::default()), Arc::new(tokens))
}

async fn wait_for(session: &RealtimeSession, want: ConnectionState) {
    let mut rx = session.watch_state();
    let _ = timeout(TIMEOUT, rx.wait_for(|s| *s == want))
        .await
        .expect("state change timed out")
        .unwrap();
}

async fn accept(rx: &mut mpsc::Receiver<Accepted>) -> Accepted {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("no connection")
        .expect("server stopped")
}

/// Next text frame from the client, decoded.
async fn next_json(ws: &mut ServerStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("no frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn frames_flow_both_ways() {
    let (url, mut conns) = boot_server().await;
    let session = session(StaticTokenSupplier::new("tok"));
    let mut inbound = session.subscribe();

    session.connect(url);
    let mut server = accept(&mut conns).await;
    assert_eq!(server.authorization.as_deref(), Some("Bearer tok"));
    wait_for(&session, ConnectionState::Open).await;

    session.join_group(GroupId::new(42));
    assert!(session.send_message("hi"));
    assert_eq!(
        next_json(&mut server.ws).await,
        json!({"type": "join-group", "body": "Joining group", "group_id": 42})
    );
    assert_eq!(
        next_json(&mut server.ws).await,
        json!({"type": "message", "body": "hi", "group_id": 42})
    );

    for (group, body) in [(7, "elsewhere"), (42, "hello")] {
        let text = json!({"type": "message", "group_id": group, "body": body}).to_string();
        server.ws.send(Message::Text(text.into())).await.unwrap();
    }
    let frame = timeout(TIMEOUT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(frame.group_id(), GroupId::new(42));
    assert_eq!(frame.body(), Some("hello"));
}

#[tokio::test]
async fn binary_utf8_frames_are_delivered() {
    let (url, mut conns) = boot_server().await;
    let session = session(StaticTokenSupplier::new("tok"));
    let mut inbound = session.subscribe();
    session.join_group(GroupId::new(3));

    session.connect(url);
    let mut server = accept(&mut conns).await;
    let _ = next_json(&mut server.ws).await;

    let bytes = br#"{"type":"message","group_id":3,"body":"bin"}"#.to_vec();
    server.ws.send(Message::Binary(bytes.into())).await.unwrap();

    let frame = timeout(TIMEOUT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(frame.body(), Some("bin"));
}

#[tokio::test]
async fn anonymous_connect_sends_no_authorization() {
    let (url, mut conns) = boot_server().await;
    let session = session(StaticTokenSupplier::anonymous());

    session.connect(url);
    let server = accept(&mut conns).await;
    assert!(server.authorization.is_none());
    wait_for(&session, ConnectionState::Open).await;
}

#[tokio::test]
async fn server_close_returns_session_to_idle() {
    let (url, mut conns) = boot_server().await;
    let session = session(StaticTokenSupplier::new("tok"));
    let _inbound = session.subscribe();
    session.join_group(GroupId::new(42));

    session.connect(url);
    let mut server = accept(&mut conns).await;
    wait_for(&session, ConnectionState::Open).await;
    let _ = next_json(&mut server.ws).await;

    server.ws.close(None).await.unwrap();
    wait_for(&session, ConnectionState::Idle).await;

    assert!(session.active_group().is_none());
    assert!(!session.has_listener());
    assert!(!session.send_message("after close"));
}

#[tokio::test]
async fn disconnect_closes_socket() {
    let (url, mut conns) = boot_server().await;
    let session = session(StaticTokenSupplier::new("tok"));

    session.connect(url);
    let mut server = accept(&mut conns).await;
    wait_for(&session, ConnectionState::Open).await;

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Idle);

    let end = timeout(TIMEOUT, server.ws.next()).await.expect("socket left open");
    assert!(matches!(end, None | Some(Ok(Message::Close(_)) | Err(_))));
}

#[tokio::test]
async fn refused_connection_returns_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = session(StaticTokenSupplier::new("tok"));
    session.join_group(GroupId::new(1));
    session.connect(format!("ws://{addr}/ws"));
    wait_for(&session, ConnectionState::Idle).await;

    assert!(session.active_group().is_none());
}
