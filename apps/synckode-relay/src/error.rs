use thiserror::Error;

use crate::protocol::RoomId;

/// Problems with a client's request. Reported to that client only, as an
/// `error` event; nothing here is fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Room not found.")]
    RoomNotFound(RoomId),
    #[error("Missing required field \"{0}\".")]
    MissingField(&'static str),
    #[error("Join a room first.")]
    NotInRoom,
    #[error("Invalid message format: {0}")]
    InvalidFrame(String),
}

impl RelayError {
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::InvalidFrame(err.to_string())
    }
}
