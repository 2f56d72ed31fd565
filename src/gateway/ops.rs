//! Domain operations behind the inbound frame tags.
//!
//! Each operation composes input validation, a storage mutation, one or more
//! hub broadcasts, and optional per-user point-to-point updates. Operations
//! run on the session's read task, except the unread recount after a send,
//! which is spawned so storage latency never stalls the read loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::db::store::{ChatStore, StoredMessage};
use crate::gateway::hub::Hub;
use crate::gateway::protocol::{
    Inbound, MarkRead, MemberEvent, MessageNew, Outbound, ReadReceipt, RoomRef, SendMessage,
    TypingUpdate, UnreadUpdate, CODE_INTERNAL_ERROR, CODE_INVALID_PAYLOAD, CODE_NOT_MEMBER,
};
use crate::gateway::session::Session;
use crate::AppState;

/// Route a decoded frame to its operation.
pub async fn dispatch(state: &AppState, session: &Arc<Session>, inbound: Inbound) {
    match inbound {
        Inbound::MessageSend(payload) => send_message(state, session, payload).await,
        Inbound::RoomJoin(payload) => join_room(state, session, payload).await,
        Inbound::RoomLeave(payload) => leave_room(state, session, payload).await,
        Inbound::TypingStart(payload) => typing(state, session, payload, true).await,
        Inbound::TypingStop(payload) => typing(state, session, payload, false).await,
        Inbound::MessageRead(payload) => mark_read(state, session, payload).await,
        Inbound::Ping => pong(session),
    }
}

async fn send_message(state: &AppState, session: &Arc<Session>, payload: SendMessage) {
    if payload.content.is_empty() || payload.room_id.is_empty() {
        send_error(session, "content and room_id are required", CODE_INVALID_PAYLOAD);
        return;
    }

    // Membership is re-checked against storage at send time; the session's
    // cached room set only gates deliveries, never publishes.
    match state.store.is_member(&payload.room_id, &session.user_id).await {
        Ok(true) => {}
        Ok(false) => {
            send_error(session, "not a member of this room", CODE_NOT_MEMBER);
            return;
        }
        Err(err) => {
            error!(error = %err, room_id = %payload.room_id, "membership check failed");
            send_error(session, "failed to send message", CODE_INTERNAL_ERROR);
            return;
        }
    }

    let StoredMessage {
        id,
        room_id,
        sender_id,
        sender_username,
        content,
        created_at,
    } = match state
        .store
        .append_message(&payload.room_id, &session.user_id, &payload.content)
        .await
    {
        Ok(message) => message,
        Err(err) => {
            error!(error = %err, room_id = %payload.room_id, "failed to append message");
            send_error(session, "failed to send message", CODE_INTERNAL_ERROR);
            return;
        }
    };

    let frame = Outbound::MessageNew(MessageNew {
        id,
        room_id: room_id.clone(),
        sender_id,
        sender_username,
        content,
        created_at: created_at.to_rfc3339(),
    })
    .encode();

    // No exclusion: the sender sees its own message as delivery confirmation.
    state.hub.broadcast_to_room(&room_id, frame, None).await;

    tokio::spawn(fan_out_unread_counts(
        state.hub.clone(),
        state.store.clone(),
        room_id,
        session.user_id.clone(),
    ));
}

/// Recompute and push the unread count to every other member of the room.
async fn fan_out_unread_counts(
    hub: Arc<Hub>,
    store: Arc<dyn ChatStore>,
    room_id: String,
    sender_id: String,
) {
    let members = match store.get_members(&room_id).await {
        Ok(members) => members,
        Err(err) => {
            warn!(error = %err, %room_id, "failed to load members for unread fan-out");
            return;
        }
    };

    for member in members {
        if member.user_id == sender_id {
            continue;
        }
        let count = match store.unread_count(&room_id, &member.user_id).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, %room_id, user_id = %member.user_id, "unread recount failed");
                continue;
            }
        };
        hub.send_to_user(
            &member.user_id,
            Outbound::UnreadUpdate(UnreadUpdate {
                room_id: room_id.clone(),
                count,
            })
            .encode(),
        );
    }
}

async fn join_room(state: &AppState, session: &Arc<Session>, payload: RoomRef) {
    if let Err(err) = state.store.add_member(&payload.room_id, &session.user_id).await {
        error!(error = %err, room_id = %payload.room_id, "failed to join room");
        send_error(session, "failed to join room", CODE_INTERNAL_ERROR);
        return;
    }

    session.subscribe(&payload.room_id);

    let frame = Outbound::MemberJoined(MemberEvent {
        room_id: payload.room_id.clone(),
        user_id: session.user_id.clone(),
        username: session.username.clone(),
    })
    .encode();
    state.hub.broadcast_to_room(&payload.room_id, frame, None).await;
}

async fn leave_room(state: &AppState, session: &Arc<Session>, payload: RoomRef) {
    if let Err(err) = state
        .store
        .remove_member(&payload.room_id, &session.user_id)
        .await
    {
        error!(error = %err, room_id = %payload.room_id, "failed to leave room");
        send_error(session, "failed to leave room", CODE_INTERNAL_ERROR);
        return;
    }

    session.unsubscribe(&payload.room_id);

    let frame = Outbound::MemberLeft(MemberEvent {
        room_id: payload.room_id.clone(),
        user_id: session.user_id.clone(),
        username: session.username.clone(),
    })
    .encode();
    state.hub.broadcast_to_room(&payload.room_id, frame, None).await;
}

/// Stateless: no storage touch, no server-side decay timer. Clients decide
/// when a typing indicator expires.
async fn typing(state: &AppState, session: &Arc<Session>, payload: RoomRef, is_typing: bool) {
    let frame = Outbound::TypingUpdate(TypingUpdate {
        room_id: payload.room_id.clone(),
        user_id: session.user_id.clone(),
        username: session.username.clone(),
        is_typing,
    })
    .encode();
    state
        .hub
        .broadcast_to_room(&payload.room_id, frame, Some(session.user_id.as_str()))
        .await;
}

async fn mark_read(state: &AppState, session: &Arc<Session>, payload: MarkRead) {
    let Ok(parsed) = DateTime::parse_from_rfc3339(&payload.timestamp) else {
        debug!(timestamp = %payload.timestamp, "unparseable read timestamp dropped");
        return;
    };
    // Clamp to now so a client cannot park its read marker in the future and
    // hide unread counts until the clock catches up.
    let at: DateTime<Utc> = parsed.with_timezone(&Utc).min(Utc::now());

    if let Err(err) = state
        .store
        .update_last_read(&payload.room_id, &session.user_id, at)
        .await
    {
        error!(error = %err, room_id = %payload.room_id, "failed to update read marker");
        send_error(session, "failed to mark read", CODE_INTERNAL_ERROR);
        return;
    }

    let frame = Outbound::ReadReceipt(ReadReceipt {
        room_id: payload.room_id.clone(),
        user_id: session.user_id.clone(),
        username: session.username.clone(),
        last_read_at: at.to_rfc3339(),
    })
    .encode();
    state
        .hub
        .broadcast_to_room(&payload.room_id, frame, Some(session.user_id.as_str()))
        .await;

    state.hub.send_to_user(
        &session.user_id,
        Outbound::UnreadUpdate(UnreadUpdate {
            room_id: payload.room_id,
            count: 0,
        })
        .encode(),
    );
}

/// Application-level ping, independent of the transport keepalive.
fn pong(session: &Arc<Session>) {
    if let Err(err) = session.try_enqueue(Outbound::Pong.encode()) {
        debug!(user_id = %session.user_id, ?err, "pong dropped");
    }
}

fn send_error(session: &Arc<Session>, message: &str, code: &str) {
    if let Err(err) = session.try_enqueue(Outbound::error(message, code).encode()) {
        debug!(user_id = %session.user_id, ?err, "error frame dropped");
    }
}
