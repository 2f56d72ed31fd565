//! Wire-format envelope and the closed frame-kind sets.
//!
//! Every frame on the socket is a UTF-8 text frame holding
//! `{ "type": <tag>, "payload": <object|null> }`. Inbound and outbound kinds
//! are closed sums with per-variant payload schemas; a frame whose payload
//! fails to decode is dropped by the read loop, not answered.

use serde::{Deserialize, Serialize};

/// Hard cap on a single frame, enforced at the transport level.
pub const MAX_FRAME_BYTES: usize = 4096;

// ---------------------------------------------------------------------------
// Error codes surfaced in outbound `error` frames
// ---------------------------------------------------------------------------

pub const CODE_INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
pub const CODE_NOT_MEMBER: &str = "NOT_MEMBER";
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

// ---------------------------------------------------------------------------
// Client → server frames
// ---------------------------------------------------------------------------

/// A decoded client frame, keyed by the envelope's `type` tag.
///
/// Fields default to empty strings when absent so that operation-level
/// validation (not the codec) decides what an empty `room_id` means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Inbound {
    #[serde(rename = "message.send")]
    MessageSend(SendMessage),
    #[serde(rename = "room.join")]
    RoomJoin(RoomRef),
    #[serde(rename = "room.leave")]
    RoomLeave(RoomRef),
    #[serde(rename = "typing.start")]
    TypingStart(RoomRef),
    #[serde(rename = "typing.stop")]
    TypingStop(RoomRef),
    #[serde(rename = "message.read")]
    MessageRead(MarkRead),
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRef {
    #[serde(default)]
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkRead {
    #[serde(default)]
    pub room_id: String,
    /// RFC 3339; unparseable values cause the frame to be dropped.
    #[serde(default)]
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Server → client frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Outbound {
    #[serde(rename = "message.new")]
    MessageNew(MessageNew),
    #[serde(rename = "typing.update")]
    TypingUpdate(TypingUpdate),
    #[serde(rename = "presence.update")]
    PresenceUpdate(PresenceUpdate),
    #[serde(rename = "read_receipt.update")]
    ReadReceipt(ReadReceipt),
    #[serde(rename = "unread.update")]
    UnreadUpdate(UnreadUpdate),
    #[serde(rename = "room.member_joined")]
    MemberJoined(MemberEvent),
    #[serde(rename = "room.member_left")]
    MemberLeft(MemberEvent),
    #[serde(rename = "error")]
    Error(ErrorInfo),
    #[serde(rename = "pong")]
    Pong,
}

impl Outbound {
    /// Encode to the wire envelope.
    ///
    /// These payloads are plain string/int/bool structs; serializing them
    /// cannot fail.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("outbound frame serializes")
    }

    pub fn error(message: impl Into<String>, code: &str) -> Self {
        Outbound::Error(ErrorInfo {
            message: message.into(),
            code: code.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNew {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    /// RFC 3339, full precision so clients can echo it back in `message.read`.
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingUpdate {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: String,
    pub username: String,
    /// `"online"` or `"offline"`.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub last_read_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadUpdate {
    pub room_id: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEvent {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_round_trip_every_tag() {
        let frames = vec![
            Inbound::MessageSend(SendMessage {
                room_id: "r1".into(),
                content: "hi".into(),
            }),
            Inbound::RoomJoin(RoomRef { room_id: "r1".into() }),
            Inbound::RoomLeave(RoomRef { room_id: "r1".into() }),
            Inbound::TypingStart(RoomRef { room_id: "r1".into() }),
            Inbound::TypingStop(RoomRef { room_id: "r1".into() }),
            Inbound::MessageRead(MarkRead {
                room_id: "r1".into(),
                timestamp: "2026-01-05T10:00:00Z".into(),
            }),
            Inbound::Ping,
        ];
        for frame in frames {
            let encoded = serde_json::to_string(&frame).unwrap();
            let decoded: Inbound = serde_json::from_str(&encoded).unwrap();
            assert_eq!(frame, decoded, "round trip failed for {encoded}");
        }
    }

    #[test]
    fn outbound_round_trip_every_tag() {
        let frames = vec![
            Outbound::MessageNew(MessageNew {
                id: "m1".into(),
                room_id: "r1".into(),
                sender_id: "u1".into(),
                sender_username: "alice".into(),
                content: "hi".into(),
                created_at: "2026-01-05T10:00:00+00:00".into(),
            }),
            Outbound::TypingUpdate(TypingUpdate {
                room_id: "r1".into(),
                user_id: "u1".into(),
                username: "alice".into(),
                is_typing: true,
            }),
            Outbound::PresenceUpdate(PresenceUpdate {
                user_id: "u1".into(),
                username: "alice".into(),
                status: "online".into(),
            }),
            Outbound::ReadReceipt(ReadReceipt {
                room_id: "r1".into(),
                user_id: "u2".into(),
                username: "bob".into(),
                last_read_at: "2026-01-05T10:00:00+00:00".into(),
            }),
            Outbound::UnreadUpdate(UnreadUpdate {
                room_id: "r1".into(),
                count: 3,
            }),
            Outbound::MemberJoined(MemberEvent {
                room_id: "r1".into(),
                user_id: "u2".into(),
                username: "bob".into(),
            }),
            Outbound::MemberLeft(MemberEvent {
                room_id: "r1".into(),
                user_id: "u2".into(),
                username: "bob".into(),
            }),
            Outbound::error("not a member of this room", CODE_NOT_MEMBER),
            Outbound::Pong,
        ];
        for frame in frames {
            let decoded: Outbound = serde_json::from_str(&frame.encode()).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn envelope_shape_on_the_wire() {
        let encoded = Outbound::UnreadUpdate(UnreadUpdate {
            room_id: "r1".into(),
            count: 0,
        })
        .encode();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "unread.update");
        assert_eq!(value["payload"]["room_id"], "r1");
        assert_eq!(value["payload"]["count"], 0);
    }

    #[test]
    fn ping_accepts_null_and_missing_payload() {
        let decoded: Inbound = serde_json::from_str(r#"{"type":"ping","payload":null}"#).unwrap();
        assert_eq!(decoded, Inbound::Ping);
        let decoded: Inbound = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(decoded, Inbound::Ping);
    }

    #[test]
    fn pong_omits_payload() {
        assert_eq!(Outbound::Pong.encode(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        assert!(serde_json::from_str::<Inbound>(r#"{"type":"message.edit","payload":{}}"#).is_err());
    }

    #[test]
    fn missing_payload_fields_default_to_empty() {
        let decoded: Inbound =
            serde_json::from_str(r#"{"type":"message.send","payload":{}}"#).unwrap();
        match decoded {
            Inbound::MessageSend(p) => {
                assert!(p.room_id.is_empty());
                assert!(p.content.is_empty());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn wrong_payload_type_fails_to_decode() {
        assert!(
            serde_json::from_str::<Inbound>(r#"{"type":"message.send","payload":"nope"}"#).is_err()
        );
    }
}
