use std::sync::Arc;

use metrics::gauge;
use serde::Serialize;

use crate::exec::{ExecConfig, ExecContext};
use crate::hub::ConnectionHub;
use crate::presence::{ColorPalette, RoomPresence, VoicePresence};
use crate::protocol::RoomId;
use crate::rooms::RoomDirectory;

/// Everything a connection needs, cloned into each session.
#[derive(Clone)]
pub struct RelayState {
    pub hub: ConnectionHub,
    pub rooms: Arc<RoomPresence>,
    pub voice: Arc<VoicePresence>,
    pub directory: Arc<dyn RoomDirectory>,
    pub exec: Arc<ExecContext>,
    pub palette: Arc<ColorPalette>,
}

#[derive(Debug, Serialize)]
pub struct RelayStats {
    pub connections: usize,
    pub rooms_active: usize,
    pub participants: usize,
    pub voice_rooms_active: usize,
    pub voice_participants: usize,
    pub processes_running: usize,
    pub rooms: Vec<RoomStatsEntry>,
}

#[derive(Debug, Serialize)]
pub struct RoomStatsEntry {
    pub room_id: RoomId,
    pub members: usize,
    pub voice_members: usize,
}

impl RelayState {
    pub fn new(directory: Arc<dyn RoomDirectory>, exec: ExecConfig) -> Self {
        Self {
            hub: ConnectionHub::new(),
            rooms: Arc::new(RoomPresence::new()),
            voice: Arc::new(VoicePresence::new()),
            directory,
            exec: Arc::new(ExecContext::new(exec)),
            palette: Arc::new(ColorPalette::default()),
        }
    }

    pub fn stats(&self) -> RelayStats {
        let voice = self.voice.snapshot();
        let mut rooms: Vec<RoomStatsEntry> = self
            .rooms
            .snapshot()
            .into_iter()
            .map(|(room_id, members)| {
                let voice_members = voice
                    .iter()
                    .find(|(voice_room, _)| *voice_room == room_id)
                    .map(|(_, count)| *count)
                    .unwrap_or(0);
                RoomStatsEntry {
                    room_id,
                    members,
                    voice_members,
                }
            })
            .collect();
        for (room_id, count) in &voice {
            if !rooms.iter().any(|entry| &entry.room_id == room_id) {
                rooms.push(RoomStatsEntry {
                    room_id: room_id.clone(),
                    members: 0,
                    voice_members: *count,
                });
            }
        }
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        RelayStats {
            connections: self.hub.connection_count(),
            rooms_active: self.rooms.room_count(),
            participants: self.rooms.participant_count(),
            voice_rooms_active: self.voice.room_count(),
            voice_participants: self.voice.participant_count(),
            processes_running: self.exec.running(),
            rooms,
        }
    }

    pub(crate) fn record_presence_gauges(&self) {
        gauge!("synckode_rooms_active", self.rooms.room_count() as f64);
        gauge!("synckode_voice_rooms_active", self.voice.room_count() as f64);
    }
}
