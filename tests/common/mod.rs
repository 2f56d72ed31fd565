//! Shared helpers for gateway integration tests: an in-process server over a
//! real TCP listener, token minting, and WebSocket client plumbing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use palaver::config::Config;
use palaver::db::store::MemoryStore;
use palaver::gateway::hub::Hub;
use palaver::AppState;

pub const TEST_SECRET: &str = "integration-test-secret";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

/// Boot the full router on an ephemeral port with an in-memory store.
pub async fn start_server() -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let (hub, hub_runner) = Hub::new();
    tokio::spawn(hub_runner.run());

    let state = AppState {
        store: store.clone() as Arc<dyn palaver::db::store::ChatStore>,
        hub,
        config: Arc::new(Config {
            database_url: String::new(),
            jwt_secret: TEST_SECRET.into(),
            port: 0,
        }),
    };

    let app = palaver::routes::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state, store }
}

pub fn mint_token(user_id: &str, username: &str) -> String {
    palaver::auth::generate_token(user_id, username, TEST_SECRET, 600).expect("mint token")
}

/// Connect an authenticated client to `/ws`.
pub async fn connect(addr: SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/ws?token={token}");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Next text frame as JSON, skipping transport pings/pongs. Panics if the
/// connection ends first.
pub async fn next_frame(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("parse frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read frames until one with the wanted `type` tag shows up.
pub async fn next_of_type(ws: &mut WsClient, tag: &str) -> serde_json::Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == tag {
            return frame;
        }
    }
}

/// Assert the server closes the connection within `wait`.
pub async fn expect_closed<S>(ws: &mut WebSocketStream<S>, wait: Duration)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let deadline = time::Instant::now() + wait;
    loop {
        let remaining = deadline
            .checked_duration_since(time::Instant::now())
            .expect("connection still open past deadline");
        match time::timeout(remaining, ws.next()).await {
            Ok(None) => return,
            Ok(Some(Ok(Message::Close(_)))) => return,
            Ok(Some(Err(_))) => return,
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("connection still open past deadline"),
        }
    }
}
