use serde::{Deserialize, Serialize};
use serde_repr::*;

/// Name of the default chat room.
pub const MAIN_ROOM: &str = "";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum ChatMessageType {
    Register,
    Unregister,
    Message,
}

/// Chat room membership change or a line of text sent to a room.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub type_: ChatMessageType,
    pub msg: String,
    pub room: String,
}

impl ChatMessage {
    /// Registers the sender to a room.
    pub fn register(room: &str) -> Self {
        Self {
            type_: ChatMessageType::Register,
            msg: String::new(),
            room: room.to_string(),
        }
    }

    /// Unregisters the sender from a room.
    pub fn unregister(room: &str) -> Self {
        Self {
            type_: ChatMessageType::Unregister,
            msg: String::new(),
            room: room.to_string(),
        }
    }

    pub fn message(msg: &str, room: &str) -> Self {
        Self {
            type_: ChatMessageType::Message,
            msg: msg.to_string(),
            room: room.to_string(),
        }
    }
}

impl Default for ChatMessage {
    fn default() -> Self {
        Self::register(MAIN_ROOM)
    }
}
