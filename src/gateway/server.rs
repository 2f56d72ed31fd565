//! WebSocket endpoint and the per-connection read/write loops.
//!
//! The upgrade handler authenticates the `?token=` bearer credential before
//! switching protocols, seeds the session's room set from storage, registers
//! with the hub, and runs one reader and one writer task per connection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, interval_at, Instant};
use tracing::{debug, warn};

use super::ops;
use super::protocol::{Inbound, MAX_FRAME_BYTES};
use super::session::Session;
use crate::auth;
use crate::AppState;

/// Deadline for a single frame write.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Rolling read deadline; reset by every frame the client gets through,
/// pongs included.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Transport keepalive interval. Must undercut `PONG_WAIT`.
const PING_PERIOD: Duration = Duration::from_secs(54);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };

    let claims = match auth::validate_token(&token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(err) => {
            debug!(error = %err, "rejected websocket token");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    ws.max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, state, claims))
}

async fn handle_connection(socket: WebSocket, state: AppState, claims: auth::Claims) {
    // A failed membership preload is non-fatal: the session starts with an
    // empty room set and the next successful join refills it.
    let rooms: HashSet<String> = match state.store.get_memberships(&claims.user_id).await {
        Ok(room_ids) => room_ids.into_iter().collect(),
        Err(err) => {
            warn!(error = %err, user_id = %claims.user_id, "membership preload failed");
            HashSet::new()
        }
    };

    let (session, outbound_rx) = Session::new(claims.user_id, claims.username, rooms);
    let (ws_tx, ws_rx) = socket.split();

    state.hub.register(session.clone()).await;

    let mut writer = tokio::spawn(write_loop(outbound_rx, ws_tx, session.clone()));
    let mut reader = tokio::spawn(read_loop(ws_rx, state.clone(), session.clone()));

    tokio::select! {
        _ = &mut reader => {
            // Reader is done; the hub closes the queue on unregister, which
            // drains the writer out.
        }
        _ = &mut writer => {
            // Writer died (error or deadline). Drop the read half too so the
            // socket closes instead of idling out the pong deadline.
            reader.abort();
        }
    }

    state.hub.unregister(session).await;
}

/// Read frames off the socket, decode, and dispatch to domain operations.
/// Unknown tags and malformed JSON are dropped without closing the session.
async fn read_loop(mut ws_rx: SplitStream<WebSocket>, state: AppState, session: Arc<Session>) {
    loop {
        let frame = match time::timeout(PONG_WAIT, ws_rx.next()).await {
            Err(_) => {
                debug!(conn_id = session.conn_id, user_id = %session.user_id, "pong deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                // Includes frames over the 4 KiB cap, which tungstenite
                // rejects at the transport layer.
                debug!(error = %err, user_id = %session.user_id, "ws read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let inbound: Inbound = match serde_json::from_str(text.as_str()) {
                    Ok(inbound) => inbound,
                    Err(err) => {
                        debug!(error = %err, user_id = %session.user_id, "undecodable frame dropped");
                        continue;
                    }
                };
                ops::dispatch(&state, &session, inbound).await;
            }
            // Pings are answered by the transport; both directions count as
            // liveness and have already reset the read deadline above.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                debug!(user_id = %session.user_id, "binary frame dropped");
            }
        }
    }
}

/// Sole writer for the connection: drains the outbound queue and keeps the
/// transport alive with periodic pings. Exits when the queue is closed
/// (after draining it) or any write fails its deadline.
async fn write_loop(
    mut outbound_rx: mpsc::Receiver<String>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    session: Arc<Session>,
) {
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            maybe_frame = outbound_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if !write_with_deadline(&mut ws_tx, Message::Text(frame.into()), &session).await {
                            break;
                        }
                    }
                    None => {
                        // Queue closed by the hub; say goodbye and stop.
                        let _ = time::timeout(WRITE_WAIT, ws_tx.send(Message::Close(None))).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if !write_with_deadline(&mut ws_tx, Message::Ping(Bytes::new()), &session).await {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
}

async fn write_with_deadline(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    session: &Session,
) -> bool {
    match time::timeout(WRITE_WAIT, ws_tx.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(error = %err, user_id = %session.user_id, "ws write error");
            false
        }
        Err(_) => {
            debug!(user_id = %session.user_id, "write deadline expired");
            false
        }
    }
}
