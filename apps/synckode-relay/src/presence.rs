//! Live room membership.
//!
//! Every room is a slot behind its own mutex; that mutex is the single point
//! of serialization for membership changes and for whatever the caller does
//! with the member list while it is held (see [`PresenceObserver`]). Rooms
//! never lock each other. A slot is retired under its lock when it empties, so
//! a concurrent join that raced the removal retries against a fresh slot
//! instead of inserting into a room that is about to disappear.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::protocol::{ConnectionId, ParticipantRecord, RoomId, VoiceParticipant};

pub type RoomPresence = Presence<ParticipantRecord>;
pub type VoicePresence = Presence<VoiceParticipant>;

/// A presence record keyed by the connection that owns it.
pub trait Member: Clone {
    fn connection_id(&self) -> &str;
}

impl Member for ParticipantRecord {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl Member for VoiceParticipant {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

/// Callbacks invoked while a room's lock is held.
///
/// Implementations must not call back into the same [`Presence`].
pub trait PresenceObserver<R> {
    /// `members` already contains `record`.
    fn joined(&mut self, _room_id: &str, _record: &R, _members: &[R]) {}
    /// `remaining` no longer contains `record`.
    fn left(&mut self, _room_id: &str, _record: &R, _remaining: &[R]) {}
}

impl<R> PresenceObserver<R> for () {}

pub struct Presence<R> {
    rooms: DashMap<RoomId, Arc<RoomSlot<R>>>,
    locations: DashMap<ConnectionId, RoomId>,
}

struct RoomSlot<R> {
    inner: Mutex<SlotInner<R>>,
}

struct SlotInner<R> {
    members: Vec<R>,
    retired: bool,
}

impl<R> RoomSlot<R> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                members: Vec::new(),
                retired: false,
            }),
        }
    }
}

impl<R: Member> Default for Presence<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Member> Presence<R> {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            locations: DashMap::new(),
        }
    }

    /// Insert `record` into `room_id`, leaving whatever room the connection
    /// occupied before. Returns the member snapshot taken after insertion.
    pub fn join<O>(&self, room_id: &str, record: R, observer: &mut O) -> Vec<R>
    where
        O: PresenceObserver<R>,
    {
        let connection_id = record.connection_id().to_owned();
        if let Some(previous) = self.location_of(&connection_id) {
            self.leave(&previous, &connection_id, observer);
        }

        loop {
            let slot = self.slot_or_insert(room_id);
            let mut guard = slot.inner.lock();
            if guard.retired {
                drop(guard);
                self.rooms
                    .remove_if(room_id, |_, current| Arc::ptr_eq(current, &slot));
                continue;
            }

            guard.members.push(record.clone());
            self.locations
                .insert(connection_id.clone(), room_id.to_owned());
            observer.joined(room_id, &record, &guard.members);
            return guard.members.clone();
        }
    }

    /// Remove the connection from `room_id`. Leaving a room the connection
    /// is not in returns `None`.
    pub fn leave<O>(&self, room_id: &str, connection_id: &str, observer: &mut O) -> Option<R>
    where
        O: PresenceObserver<R>,
    {
        let slot = self.slot(room_id)?;

        let (removed, emptied) = {
            let mut guard = slot.inner.lock();
            let index = guard
                .members
                .iter()
                .position(|member| member.connection_id() == connection_id)?;
            let removed = guard.members.remove(index);
            observer.left(room_id, &removed, &guard.members);
            let emptied = guard.members.is_empty();
            if emptied {
                guard.retired = true;
            }
            (removed, emptied)
        };

        if emptied {
            self.rooms
                .remove_if(room_id, |_, current| Arc::ptr_eq(current, &slot));
        }
        self.locations
            .remove_if(connection_id, |_, current| current == room_id);

        Some(removed)
    }

    /// Snapshot of a room's members; empty for unknown rooms.
    pub fn members(&self, room_id: &str) -> Vec<R> {
        self.with_members(room_id, |members| members.to_vec())
            .unwrap_or_default()
    }

    /// Run `f` against the member list while the room is locked. `None` when
    /// the room has no live members.
    pub fn with_members<T>(&self, room_id: &str, f: impl FnOnce(&[R]) -> T) -> Option<T> {
        let slot = self.slot(room_id)?;
        let guard = slot.inner.lock();
        if guard.retired {
            return None;
        }
        Some(f(&guard.members))
    }

    /// The room a connection currently occupies.
    pub fn location_of(&self, connection_id: &str) -> Option<RoomId> {
        self.locations
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn participant_count(&self) -> usize {
        self.locations.len()
    }

    /// Per-room member counts, for stats.
    pub fn snapshot(&self) -> Vec<(RoomId, usize)> {
        let slots: Vec<(RoomId, Arc<RoomSlot<R>>)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        slots
            .into_iter()
            .filter_map(|(room_id, slot)| {
                let guard = slot.inner.lock();
                (!guard.retired).then(|| (room_id, guard.members.len()))
            })
            .collect()
    }

    fn slot(&self, room_id: &str) -> Option<Arc<RoomSlot<R>>> {
        // Clone the Arc so no DashMap guard is held while the room is locked.
        self.rooms.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    fn slot_or_insert(&self, room_id: &str) -> Arc<RoomSlot<R>> {
        let entry = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| Arc::new(RoomSlot::new()));
        Arc::clone(entry.value())
    }
}

/// Round-robin color assignment for cursors and avatars.
pub struct ColorPalette {
    colors: Vec<String>,
    next: AtomicUsize,
}

pub const DEFAULT_COLORS: [&str; 8] = [
    "#FFD700", "#8B5CF6", "#00D4FF", "#00FF9F", "#FF6B1A", "#FF2D78", "#00BFFF", "#7CFC00",
];

impl ColorPalette {
    pub fn new(colors: Vec<String>) -> Self {
        assert!(!colors.is_empty(), "color palette must not be empty");
        Self {
            colors,
            next: AtomicUsize::new(0),
        }
    }

    pub fn next_color(&self) -> String {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.colors.len();
        self.colors[index].clone()
    }
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self::new(DEFAULT_COLORS.iter().map(|c| c.to_string()).collect())
    }
}
