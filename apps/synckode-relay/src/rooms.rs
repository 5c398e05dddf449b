//! Room lookup and document storage consumed by the relay.
//!
//! Room CRUD lives outside this service; the relay only needs to find a room,
//! overwrite its document and keep the account member list in step with
//! presence. [`MemoryRoomDirectory`] is the in-process implementation used by
//! the server binary and the tests.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::RoomId;

pub const DEFAULT_LANGUAGE: &str = "javascript";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDocument {
    pub id: RoomId,
    pub name: String,
    pub code: String,
    pub language: String,
    /// Account ids that have joined the room.
    #[serde(default)]
    pub members: Vec<String>,
}

impl RoomDocument {
    pub fn new(id: impl Into<RoomId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            code: String::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            members: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>, language: impl Into<String>) -> Self {
        self.code = code.into();
        self.language = language.into();
        self
    }
}

pub trait RoomDirectory: Send + Sync {
    fn find_room(&self, room_id: &str) -> Option<RoomDocument>;

    /// Overwrite the room's document. `language` is left untouched when
    /// `None`. Returns false for unknown rooms.
    fn update_document(&self, room_id: &str, code: &str, language: Option<&str>) -> bool;

    fn add_member(&self, room_id: &str, user_id: &str);

    fn remove_member(&self, room_id: &str, user_id: &str);

    fn list_rooms(&self) -> Vec<RoomDocument>;
}

#[derive(Default)]
pub struct MemoryRoomDirectory {
    rooms: DashMap<RoomId, RoomDocument>,
}

impl MemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated with the public rooms every deployment ships.
    pub fn with_default_rooms() -> Self {
        let directory = Self::new();
        directory.insert(
            RoomDocument::new("nexus-hackathon", "SyncKode Hackathon - Build with AI").with_code(
                "// Welcome to the SyncKode Hackathon!\n// Start coding together...\n",
                "javascript",
            ),
        );
        directory.insert(
            RoomDocument::new("react-workshop", "React 19 Deep Dive Workshop").with_code(
                "import React from \"react\";\n\nexport default function App() {\n  return <h1>Hello SyncKode!</h1>;\n}\n",
                "javascript",
            ),
        );
        directory.insert(
            RoomDocument::new("python-ml", "Python ML & LLM Playground").with_code(
                "# SyncKode Python ML Playground\nimport torch\nprint(\"CUDA available:\", torch.cuda.is_available())\n",
                "python",
            ),
        );
        directory
    }

    pub fn insert(&self, room: RoomDocument) {
        self.rooms.insert(room.id.clone(), room);
    }

    /// Add an empty room unless one with the same id exists.
    pub fn ensure_room(&self, room_id: &str) {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomDocument::new(room_id, room_id).with_code("// Start coding here...\n", DEFAULT_LANGUAGE));
    }
}

impl RoomDirectory for MemoryRoomDirectory {
    fn find_room(&self, room_id: &str) -> Option<RoomDocument> {
        self.rooms.get(room_id).map(|room| room.value().clone())
    }

    fn update_document(&self, room_id: &str, code: &str, language: Option<&str>) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        room.code = code.to_string();
        if let Some(language) = language {
            room.language = language.to_string();
        }
        true
    }

    fn add_member(&self, room_id: &str, user_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            if !room.members.iter().any(|member| member == user_id) {
                room.members.push(user_id.to_string());
            }
        }
    }

    fn remove_member(&self, room_id: &str, user_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.members.retain(|member| member != user_id);
        }
    }

    fn list_rooms(&self) -> Vec<RoomDocument> {
        let mut rooms: Vec<RoomDocument> = self.rooms.iter().map(|room| room.value().clone()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }
}
