//! Per-connection event routing.
//!
//! A [`Session`] is owned by exactly one socket task. It turns inbound
//! [`ClientEvent`]s into presence changes, document updates, signaling and
//! process control, and fans the results out through the
//! [`ConnectionHub`]. Room fan-out happens inside presence observers, so a
//! member list is never broadcast out of order with the change that
//! produced it.

use chrono::Utc;
use metrics::gauge;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::exec::{ExecEvent, ExecutionSlot, RunRequest, TerminalFrame};
use crate::hub::ConnectionHub;
use crate::presence::PresenceObserver;
use crate::protocol::{
    generate_connection_id, ClientEvent, ConnectionId, ParticipantRecord, RoomId, ServerEvent,
    VoiceParticipant,
};
use crate::rooms::{RoomDirectory, DEFAULT_LANGUAGE};
use crate::state::RelayState;
use crate::voice::{self, Signal};

pub const ANONYMOUS: &str = "Anonymous";

/// Broadcasts room membership changes while the room is locked.
struct RoomFanout<'a> {
    hub: &'a ConnectionHub,
    directory: &'a dyn RoomDirectory,
}

fn connection_ids(members: &[ParticipantRecord]) -> impl Iterator<Item = &str> {
    members.iter().map(|member| member.connection_id.as_str())
}

fn is_account(record: &ParticipantRecord) -> bool {
    record.user_id != record.connection_id
}

impl PresenceObserver<ParticipantRecord> for RoomFanout<'_> {
    fn joined(&mut self, room_id: &str, record: &ParticipantRecord, members: &[ParticipantRecord]) {
        if is_account(record) {
            self.directory.add_member(room_id, &record.user_id);
        }

        let (code, language) = match self.directory.find_room(room_id) {
            Some(room) => (room.code, room.language),
            None => (String::new(), DEFAULT_LANGUAGE.to_string()),
        };
        self.hub.send(
            &record.connection_id,
            ServerEvent::RoomJoined {
                room_id: room_id.to_string(),
                code,
                language,
                members: members.to_vec(),
            },
        );
        self.hub.multicast(
            connection_ids(members),
            Some(record.connection_id.as_str()),
            &ServerEvent::UserJoined(record.clone()),
        );
        self.hub.multicast(
            connection_ids(members),
            None,
            &ServerEvent::RoomMembers {
                room_id: room_id.to_string(),
                members: members.to_vec(),
            },
        );
    }

    fn left(&mut self, room_id: &str, record: &ParticipantRecord, remaining: &[ParticipantRecord]) {
        if is_account(record) {
            self.directory.remove_member(room_id, &record.user_id);
        }

        self.hub.multicast(
            connection_ids(remaining),
            None,
            &ServerEvent::UserLeft(record.clone()),
        );
        self.hub.multicast(
            connection_ids(remaining),
            None,
            &ServerEvent::RoomMembers {
                room_id: room_id.to_string(),
                members: remaining.to_vec(),
            },
        );
    }
}

/// Who the connection said it was on its most recent `join-room`.
#[derive(Debug, Clone)]
struct Identity {
    user_id: String,
    display_name: String,
    avatar: Option<String>,
    color: String,
}

pub struct Session {
    connection_id: ConnectionId,
    relay: RelayState,
    identity: Option<Identity>,
    exec: ExecutionSlot,
}

impl Session {
    /// Register a new connection. Returns the session plus its outbound
    /// queue and its execution completion queue; the socket task drains the
    /// first and feeds the second back through [`Session::on_exec_event`].
    pub fn open(
        relay: RelayState,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<ServerEvent>,
        mpsc::UnboundedReceiver<ExecEvent>,
    ) {
        let connection_id = generate_connection_id();
        let (outbound, outbound_rx) = relay.hub.register(&connection_id);
        let (exec, exec_rx) = ExecutionSlot::new(relay.exec.clone());
        let _ = outbound.send(ServerEvent::Connected {
            connection_id: connection_id.clone(),
        });
        gauge!("synckode_connections_active", relay.hub.connection_count() as f64);

        let session = Self {
            connection_id,
            relay,
            identity: None,
            exec,
        };
        (session, outbound_rx, exec_rx)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The code room this connection currently occupies.
    pub fn current_room(&self) -> Option<RoomId> {
        self.relay.rooms.location_of(&self.connection_id)
    }

    pub async fn handle(&mut self, event: ClientEvent) -> Result<(), RelayError> {
        match event {
            ClientEvent::JoinRoom {
                room_id,
                user_id,
                name,
                avatar,
            } => self.join_room(room_id, user_id, name, avatar),
            ClientEvent::LeaveRoom { room_id } => {
                self.leave_room(&room_id);
                Ok(())
            }
            ClientEvent::CodeChange {
                room_id,
                code,
                language,
            } => self.change_code(&room_id, code, language),
            ClientEvent::CursorMove { room_id, line, col } => {
                self.move_cursor(&room_id, line, col);
                Ok(())
            }
            ClientEvent::ChatMessage { room_id, message } => self.chat(room_id, message),
            ClientEvent::RequestCode { room_id } => self.send_code(&room_id),
            ClientEvent::VoiceJoin { room_id } => {
                let participant = self.voice_participant();
                voice::join(&self.relay.hub, &self.relay.voice, &room_id, participant);
                self.relay.record_presence_gauges();
                Ok(())
            }
            ClientEvent::VoiceLeave { room_id } => {
                voice::leave(&self.relay.hub, &self.relay.voice, &room_id, &self.connection_id);
                self.relay.record_presence_gauges();
                Ok(())
            }
            ClientEvent::VoiceOffer { to, sdp, .. } => {
                voice::forward(&self.relay.hub, &self.connection_id, &to, Signal::Offer(sdp));
                Ok(())
            }
            ClientEvent::VoiceAnswer { to, sdp, .. } => {
                voice::forward(&self.relay.hub, &self.connection_id, &to, Signal::Answer(sdp));
                Ok(())
            }
            ClientEvent::VoiceIce { to, candidate, .. } => {
                voice::forward(&self.relay.hub, &self.connection_id, &to, Signal::Ice(candidate));
                Ok(())
            }
            ClientEvent::TerminalRun {
                code,
                language,
                command,
            } => {
                let frames = self
                    .exec
                    .run(RunRequest {
                        code,
                        language,
                        command,
                    })
                    .await;
                self.deliver(frames);
                Ok(())
            }
            ClientEvent::TerminalInput { data } => {
                self.exec.write_input(&data);
                Ok(())
            }
            ClientEvent::TerminalKill => {
                let frames = self.exec.kill();
                self.deliver(frames);
                Ok(())
            }
            ClientEvent::Ping => {
                self.send(ServerEvent::Pong);
                Ok(())
            }
        }
    }

    /// Report an input error to this connection only.
    pub fn report(&self, err: &RelayError) {
        debug!(connection_id = %self.connection_id, error = %err, "rejecting client event");
        self.send(ServerEvent::Error {
            message: err.client_message(),
        });
    }

    pub fn on_exec_event(&mut self, event: ExecEvent) {
        if let Some(frame) = self.exec.accept(event) {
            self.deliver([frame]);
        }
    }

    /// Tear down voice presence, room presence and any running process, in
    /// that order. Each step stands on its own.
    pub fn close(mut self) {
        voice::leave_current(&self.relay.hub, &self.relay.voice, &self.connection_id);
        if let Some(room_id) = self.current_room() {
            self.leave_room(&room_id);
        }
        self.exec.shutdown();
        self.relay.hub.unregister(&self.connection_id);
        self.relay.record_presence_gauges();
        gauge!(
            "synckode_connections_active",
            self.relay.hub.connection_count() as f64
        );
        info!(connection_id = %self.connection_id, "session closed");
    }

    fn join_room(
        &mut self,
        room_id: Option<RoomId>,
        user_id: Option<String>,
        name: Option<String>,
        avatar: Option<String>,
    ) -> Result<(), RelayError> {
        let room_id = room_id
            .filter(|room_id| !room_id.is_empty())
            .ok_or(RelayError::MissingField("roomId"))?;
        if self.relay.directory.find_room(&room_id).is_none() {
            return Err(RelayError::RoomNotFound(room_id));
        }

        let identity = Identity {
            user_id: user_id
                .filter(|user_id| !user_id.is_empty())
                .unwrap_or_else(|| self.connection_id.clone()),
            display_name: name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            avatar: avatar.filter(|avatar| !avatar.is_empty()),
            color: self.relay.palette.next_color(),
        };
        let record = ParticipantRecord {
            connection_id: self.connection_id.clone(),
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            color: identity.color.clone(),
        };
        self.identity = Some(identity);

        let members = self.relay.rooms.join(
            &room_id,
            record,
            &mut RoomFanout {
                hub: &self.relay.hub,
                directory: self.relay.directory.as_ref(),
            },
        );
        self.relay.record_presence_gauges();
        info!(
            connection_id = %self.connection_id,
            room_id = %room_id,
            members = members.len(),
            "joined room"
        );
        Ok(())
    }

    fn leave_room(&self, room_id: &str) {
        let left = self.relay.rooms.leave(
            room_id,
            &self.connection_id,
            &mut RoomFanout {
                hub: &self.relay.hub,
                directory: self.relay.directory.as_ref(),
            },
        );
        if left.is_some() {
            self.relay.record_presence_gauges();
            info!(connection_id = %self.connection_id, room_id, "left room");
        }
    }

    fn change_code(
        &self,
        room_id: &str,
        code: String,
        language: Option<String>,
    ) -> Result<(), RelayError> {
        if self.relay.directory.find_room(room_id).is_none() {
            return Err(RelayError::RoomNotFound(room_id.to_string()));
        }

        let update = ServerEvent::CodeUpdate {
            code: code.clone(),
            language: language.clone(),
            from_user_id: self.identity.as_ref().map(|identity| identity.user_id.clone()),
        };

        let hub = &self.relay.hub;
        let directory = self.relay.directory.as_ref();
        let connection_id = self.connection_id.as_str();
        // Overwrite and relay under the room lock; joiners read the document
        // under the same lock.
        let relayed = self.relay.rooms.with_members(room_id, |members| {
            directory.update_document(room_id, &code, language.as_deref());
            hub.multicast(connection_ids(members), Some(connection_id), &update)
        });
        if relayed.is_none() {
            directory.update_document(room_id, &code, language.as_deref());
        }
        debug!(connection_id, room_id, relayed = relayed.unwrap_or(0), "code change");
        Ok(())
    }

    fn move_cursor(&self, room_id: &str, line: u32, col: u32) {
        let identity = self.identity.as_ref();
        let update = ServerEvent::CursorUpdate {
            room_id: room_id.to_string(),
            line,
            col,
            connection_id: self.connection_id.clone(),
            user_id: identity.map(|identity| identity.user_id.clone()),
            name: identity.map(|identity| identity.display_name.clone()),
            color: identity.map(|identity| identity.color.clone()),
        };
        let hub = &self.relay.hub;
        self.relay.rooms.with_members(room_id, |members| {
            hub.multicast(connection_ids(members), Some(self.connection_id.as_str()), &update)
        });
    }

    fn chat(&self, room_id: Option<RoomId>, message: String) -> Result<(), RelayError> {
        let room_id = room_id
            .filter(|room_id| !room_id.is_empty())
            .or_else(|| self.current_room())
            .ok_or(RelayError::NotInRoom)?;

        let identity = self.identity.as_ref();
        let event = ServerEvent::ChatMessage {
            room_id: room_id.clone(),
            message,
            user_id: identity
                .map(|identity| identity.user_id.clone())
                .unwrap_or_else(|| self.connection_id.clone()),
            name: identity
                .map(|identity| identity.display_name.clone())
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            avatar: identity.and_then(|identity| identity.avatar.clone()),
            timestamp: Utc::now(),
        };
        let hub = &self.relay.hub;
        self.relay.rooms.with_members(&room_id, |members| {
            hub.multicast(connection_ids(members), None, &event)
        });
        Ok(())
    }

    fn send_code(&self, room_id: &str) -> Result<(), RelayError> {
        let room = self
            .relay
            .directory
            .find_room(room_id)
            .ok_or_else(|| RelayError::RoomNotFound(room_id.to_string()))?;
        self.send(ServerEvent::CodeUpdate {
            code: room.code,
            language: Some(room.language),
            from_user_id: None,
        });
        Ok(())
    }

    fn voice_participant(&self) -> VoiceParticipant {
        match &self.identity {
            Some(identity) => VoiceParticipant {
                connection_id: self.connection_id.clone(),
                user_id: identity.user_id.clone(),
                display_name: identity.display_name.clone(),
            },
            None => VoiceParticipant {
                connection_id: self.connection_id.clone(),
                user_id: self.connection_id.clone(),
                display_name: ANONYMOUS.to_string(),
            },
        }
    }

    fn send(&self, event: ServerEvent) {
        self.relay.hub.send(&self.connection_id, event);
    }

    fn deliver(&self, frames: impl IntoIterator<Item = TerminalFrame>) {
        for frame in frames {
            self.send(frame.into());
        }
    }
}
