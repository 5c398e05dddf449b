use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport-level identity of one live socket.
pub type ConnectionId = String;
pub type RoomId = String;

/// Messages sent from a browser client to the relay.
///
/// Frames are JSON objects tagged by `type` (`join-room`, `voice-offer`, ...)
/// with camelCase fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        #[serde(default)]
        room_id: Option<RoomId>,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    /// Full document overwrite; the relay keeps no history.
    CodeChange {
        room_id: RoomId,
        code: String,
        #[serde(default)]
        language: Option<String>,
    },
    CursorMove {
        room_id: RoomId,
        line: u32,
        col: u32,
    },
    ChatMessage {
        /// Falls back to the connection's current room.
        #[serde(default)]
        room_id: Option<RoomId>,
        message: String,
    },
    RequestCode {
        room_id: RoomId,
    },
    VoiceJoin {
        room_id: RoomId,
    },
    VoiceLeave {
        room_id: RoomId,
    },
    VoiceOffer {
        #[serde(default)]
        room_id: Option<RoomId>,
        to: ConnectionId,
        sdp: serde_json::Value,
    },
    VoiceAnswer {
        #[serde(default)]
        room_id: Option<RoomId>,
        to: ConnectionId,
        sdp: serde_json::Value,
    },
    VoiceIce {
        #[serde(default)]
        room_id: Option<RoomId>,
        to: ConnectionId,
        candidate: serde_json::Value,
    },
    TerminalRun {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        command: Option<String>,
    },
    TerminalInput {
        data: String,
    },
    TerminalKill,
    /// Keep-alive
    Ping,
}

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// First frame on every socket; tells the client its signaling address.
    Connected {
        connection_id: ConnectionId,
    },
    RoomJoined {
        room_id: RoomId,
        code: String,
        language: String,
        members: Vec<ParticipantRecord>,
    },
    UserJoined(ParticipantRecord),
    UserLeft(ParticipantRecord),
    RoomMembers {
        room_id: RoomId,
        members: Vec<ParticipantRecord>,
    },
    CodeUpdate {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_user_id: Option<String>,
    },
    CursorUpdate {
        room_id: RoomId,
        line: u32,
        col: u32,
        connection_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    ChatMessage {
        room_id: RoomId,
        message: String,
        user_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        timestamp: DateTime<Utc>,
    },
    VoiceCurrentUsers {
        room_id: RoomId,
        users: Vec<VoiceParticipant>,
    },
    VoiceUserJoined(VoiceParticipant),
    VoiceUserLeft(VoiceParticipant),
    VoiceOffer {
        from: ConnectionId,
        sdp: serde_json::Value,
    },
    VoiceAnswer {
        from: ConnectionId,
        sdp: serde_json::Value,
    },
    VoiceIce {
        from: ConnectionId,
        candidate: serde_json::Value,
    },
    TerminalOutput {
        data: String,
        stream_kind: StreamKind,
    },
    TerminalExit {
        status_code: i32,
    },
    Error {
        message: String,
    },
    Pong,
}

/// Live presence entry for one connection in a code room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub connection_id: ConnectionId,
    /// Account id, or the connection id for anonymous users.
    pub user_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParticipant {
    pub connection_id: ConnectionId,
    pub user_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
    /// Messages synthesized by the relay (timeouts, kills).
    System,
}

/// Generate a unique connection ID
pub fn generate_connection_id() -> ConnectionId {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn parses_kebab_case_events_with_camel_case_fields() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "join-room",
            "roomId": "python-ml",
            "userId": "u-1",
            "name": "Ada",
        }))
        .unwrap();

        match event {
            ClientEvent::JoinRoom {
                room_id,
                user_id,
                name,
                avatar,
            } => {
                assert_eq!(room_id.as_deref(), Some("python-ml"));
                assert_eq!(user_id.as_deref(), Some("u-1"));
                assert_eq!(name.as_deref(), Some("Ada"));
                assert!(avatar.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn unit_events_accept_extra_fields() {
        let event: ClientEvent =
            serde_json::from_value(json!({ "type": "terminal-kill", "roomId": "x" })).unwrap();
        assert!(matches!(event, ClientEvent::TerminalKill));
    }

    #[test_timeout::timeout]
    fn signaling_payloads_stay_opaque() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "voice-ice",
            "roomId": "r",
            "to": "peer-b",
            "candidate": { "candidate": "candidate:1 1 udp 2122260223", "sdpMLineIndex": 0 },
        }))
        .unwrap();

        let ClientEvent::VoiceIce { to, candidate, .. } = event else {
            panic!("expected voice-ice");
        };
        assert_eq!(to, "peer-b");
        assert_eq!(candidate["sdpMLineIndex"], 0);
    }

    #[test_timeout::timeout]
    fn participant_events_flatten_the_record() {
        let record = ParticipantRecord {
            connection_id: "c1".into(),
            user_id: "u1".into(),
            display_name: "Ada".into(),
            avatar: None,
            color: "#FFD700".into(),
        };
        let value = serde_json::to_value(ServerEvent::UserJoined(record)).unwrap();
        assert_eq!(value["type"], "user-joined");
        assert_eq!(value["connectionId"], "c1");
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["color"], "#FFD700");
    }

    #[test_timeout::timeout]
    fn terminal_events_use_wire_names() {
        let value = serde_json::to_value(ServerEvent::TerminalOutput {
            data: "hi\n".into(),
            stream_kind: StreamKind::Stderr,
        })
        .unwrap();
        assert_eq!(value, json!({ "type": "terminal-output", "data": "hi\n", "streamKind": "stderr" }));

        let value = serde_json::to_value(ServerEvent::TerminalExit { status_code: 130 }).unwrap();
        assert_eq!(value, json!({ "type": "terminal-exit", "statusCode": 130 }));
    }

    #[test_timeout::timeout]
    fn missing_required_field_is_rejected() {
        let result = serde_json::from_value::<ClientEvent>(json!({ "type": "code-change", "roomId": "r" }));
        assert!(result.is_err());
    }
}
