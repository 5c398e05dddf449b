//! Voice-call presence and WebRTC signaling relay.
//!
//! The relay never looks inside offers, answers or ICE candidates; it only
//! re-addresses them from the sender to `to`.

use metrics::counter;
use tracing::debug;

use crate::hub::ConnectionHub;
use crate::presence::{PresenceObserver, VoicePresence};
use crate::protocol::{ServerEvent, VoiceParticipant};

/// An opaque signaling payload on its way to a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(serde_json::Value),
    Answer(serde_json::Value),
    Ice(serde_json::Value),
}

impl Signal {
    fn kind(&self) -> &'static str {
        match self {
            Signal::Offer(_) => "offer",
            Signal::Answer(_) => "answer",
            Signal::Ice(_) => "ice",
        }
    }

    fn into_event(self, from: &str) -> ServerEvent {
        let from = from.to_string();
        match self {
            Signal::Offer(sdp) => ServerEvent::VoiceOffer { from, sdp },
            Signal::Answer(sdp) => ServerEvent::VoiceAnswer { from, sdp },
            Signal::Ice(candidate) => ServerEvent::VoiceIce { from, candidate },
        }
    }
}

/// Fans voice membership changes out while the voice room is locked.
struct VoiceFanout<'a> {
    hub: &'a ConnectionHub,
}

impl PresenceObserver<VoiceParticipant> for VoiceFanout<'_> {
    fn joined(&mut self, room_id: &str, record: &VoiceParticipant, members: &[VoiceParticipant]) {
        let existing: Vec<VoiceParticipant> = members
            .iter()
            .filter(|member| member.connection_id != record.connection_id)
            .cloned()
            .collect();

        self.hub.send(
            &record.connection_id,
            ServerEvent::VoiceCurrentUsers {
                room_id: room_id.to_string(),
                users: existing.clone(),
            },
        );
        self.hub.multicast(
            existing.iter().map(|member| member.connection_id.as_str()),
            None,
            &ServerEvent::VoiceUserJoined(record.clone()),
        );
    }

    fn left(&mut self, _room_id: &str, record: &VoiceParticipant, remaining: &[VoiceParticipant]) {
        self.hub.multicast(
            remaining.iter().map(|member| member.connection_id.as_str()),
            None,
            &ServerEvent::VoiceUserLeft(record.clone()),
        );
    }
}

/// Enter a voice room, leaving any other voice room first. The joiner gets
/// the members that were already there; they get `voice-user-joined`.
pub fn join(hub: &ConnectionHub, voice: &VoicePresence, room_id: &str, participant: VoiceParticipant) {
    debug!(connection_id = %participant.connection_id, room_id, "voice join");
    voice.join(room_id, participant, &mut VoiceFanout { hub });
}

/// Returns whether the connection was in the room.
pub fn leave(hub: &ConnectionHub, voice: &VoicePresence, room_id: &str, connection_id: &str) -> bool {
    let left = voice
        .leave(room_id, connection_id, &mut VoiceFanout { hub })
        .is_some();
    if left {
        debug!(connection_id, room_id, "voice leave");
    }
    left
}

/// Leave whichever voice room the connection occupies.
pub fn leave_current(hub: &ConnectionHub, voice: &VoicePresence, connection_id: &str) -> bool {
    match voice.location_of(connection_id) {
        Some(room_id) => leave(hub, voice, &room_id, connection_id),
        None => false,
    }
}

/// Forward a signaling payload to `to`. Unknown targets are dropped.
pub fn forward(hub: &ConnectionHub, from: &str, to: &str, signal: Signal) -> bool {
    let kind = signal.kind();
    let delivered = hub.send(to, signal.into_event(from));
    if delivered {
        counter!("synckode_signals_forwarded_total", 1, "kind" => kind);
    } else {
        debug!(from, to, kind, "signal target not connected");
    }
    delivered
}
