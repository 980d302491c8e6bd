//! Message definitions.
//!
//! Every message travels inside a single [`Frame`] whose kind byte is the
//! message's [`MessageType`], so a frame can always be decoded without any
//! context beyond the configured encoding.
//!
//! System messages (keep-alive, echo and correlated replies) are consumed by
//! the network's system worker, application messages are routed to services.

use std::borrow::Cow;
use std::convert::TryFrom;

use num_enum::TryFromPrimitive;
use serde_repr::*;

use crate::socket::{self, Encoding, Frame, FLAG_COMPRESSED};
use crate::Result;

pub mod chat;
pub mod grid;
pub mod sync;
pub mod system;

pub use chat::{ChatMessage, ChatMessageType};
pub use grid::{GridMessage, GridMessageType, JobId};
pub use sync::{SyncMessage, SyncMessageType};
pub use system::{EchoMessage, ReplyMessage, ResponseId, UserMessage};

/// Payloads shorter than this are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 512;

/// Code identifying the kind of message carried by a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, TryFromPrimitive, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum MessageType {
    KeepAlive = 0,
    Echo = 1,
    Reply = 2,

    Chat = 10,
    Sync = 11,
    Grid = 12,

    User = 100,
}

/// Variant message type sent across the network.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    Echo(EchoMessage),
    Reply(ReplyMessage),
    Chat(ChatMessage),
    Sync(SyncMessage),
    Grid(GridMessage),
    User(UserMessage),
}

impl Message {
    pub fn type_(&self) -> MessageType {
        match self {
            Message::KeepAlive => MessageType::KeepAlive,
            Message::Echo(_) => MessageType::Echo,
            Message::Reply(_) => MessageType::Reply,
            Message::Chat(_) => MessageType::Chat,
            Message::Sync(_) => MessageType::Sync,
            Message::Grid(_) => MessageType::Grid,
            Message::User(_) => MessageType::User,
        }
    }

    /// System messages are handled by the network machinery itself and never
    /// reach services.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Message::KeepAlive | Message::Echo(_) | Message::Reply(_)
        )
    }

    /// Response id of a message taking part in request/response
    /// correlation.
    pub fn response_id(&self) -> Option<ResponseId> {
        match self {
            Message::Echo(echo) => echo.response_id,
            Message::Reply(reply) => Some(reply.response_id),
            Message::User(user) => user.response_id,
            _ => None,
        }
    }

    /// Tags the message with a response id. Only messages that can be
    /// answered accept one.
    pub fn set_response_id(&mut self, id: ResponseId) -> Result<()> {
        match self {
            Message::Echo(echo) => echo.response_id = Some(id),
            Message::User(user) => user.response_id = Some(id),
            _ => {
                return Err(crate::Error::UnexpectedMessage(format!(
                    "{:?} message can't carry a response id",
                    self.type_()
                )))
            }
        }
        Ok(())
    }

    /// Encodes the message into a frame, compressing the payload if it's
    /// large enough.
    pub fn to_frame(&self, encoding: &Encoding, compress: bool) -> Result<Frame> {
        let payload = match self {
            Message::KeepAlive => Vec::new(),
            Message::Echo(msg) => socket::pack(msg, encoding)?,
            Message::Reply(msg) => socket::pack(msg, encoding)?,
            Message::Chat(msg) => socket::pack(msg, encoding)?,
            Message::Sync(msg) => socket::pack(msg, encoding)?,
            Message::Grid(msg) => socket::pack(msg, encoding)?,
            Message::User(msg) => socket::pack(msg, encoding)?,
        };
        let kind = self.type_() as u8;

        #[cfg(feature = "lz4")]
        {
            if compress && payload.len() >= COMPRESSION_THRESHOLD {
                return Ok(Frame::new(kind, FLAG_COMPRESSED, socket::compress(&payload)?));
            }
        }
        #[cfg(not(feature = "lz4"))]
        let _ = compress;

        Ok(Frame::new(kind, 0, payload))
    }

    /// Serializes the message into bytes ready to be written to a stream.
    pub fn to_bytes(&self, encoding: &Encoding, compress: bool) -> Result<Vec<u8>> {
        Ok(self.to_frame(encoding, compress)?.to_bytes())
    }

    /// Decodes a message from a complete frame. Compressed payloads
    /// inflating to more than `max_size` bytes are rejected.
    pub fn from_frame(frame: &Frame, encoding: &Encoding, max_size: usize) -> Result<Message> {
        let type_ = MessageType::try_from(frame.kind)?;
        let payload: Cow<[u8]> = if frame.flags & FLAG_COMPRESSED != 0 {
            Cow::Owned(socket::decompress(&frame.payload, max_size)?)
        } else {
            Cow::Borrowed(&frame.payload)
        };
        let msg = match type_ {
            MessageType::KeepAlive => Message::KeepAlive,
            MessageType::Echo => Message::Echo(socket::unpack(&payload, encoding)?),
            MessageType::Reply => Message::Reply(socket::unpack(&payload, encoding)?),
            MessageType::Chat => Message::Chat(socket::unpack(&payload, encoding)?),
            MessageType::Sync => Message::Sync(socket::unpack(&payload, encoding)?),
            MessageType::Grid => Message::Grid(socket::unpack(&payload, encoding)?),
            MessageType::User => Message::User(socket::unpack(&payload, encoding)?),
        };
        Ok(msg)
    }
}

impl From<EchoMessage> for Message {
    fn from(msg: EchoMessage) -> Self {
        Message::Echo(msg)
    }
}

impl From<ReplyMessage> for Message {
    fn from(msg: ReplyMessage) -> Self {
        Message::Reply(msg)
    }
}

impl From<ChatMessage> for Message {
    fn from(msg: ChatMessage) -> Self {
        Message::Chat(msg)
    }
}

impl From<SyncMessage> for Message {
    fn from(msg: SyncMessage) -> Self {
        Message::Sync(msg)
    }
}

impl From<GridMessage> for Message {
    fn from(msg: GridMessage) -> Self {
        Message::Grid(msg)
    }
}

impl From<UserMessage> for Message {
    fn from(msg: UserMessage) -> Self {
        Message::User(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const LIMIT: usize = 1024 * 1024;

    #[test]
    fn unknown_kind_is_an_error() {
        let frame = Frame::new(42, 0, Vec::new());
        match Message::from_frame(&frame, &Encoding::Bincode, LIMIT) {
            Err(Error::UnknownMsgCode(_)) => (),
            other => panic!("expected unknown message code error, got: {:?}", other),
        }
    }

    #[test]
    fn keep_alive_has_no_payload() {
        let frame = Message::KeepAlive.to_frame(&Encoding::Bincode, true).unwrap();
        assert_eq!(frame.kind, MessageType::KeepAlive as u8);
        assert!(frame.payload.is_empty());
        assert_eq!(
            Message::from_frame(&frame, &Encoding::Bincode, LIMIT).unwrap(),
            Message::KeepAlive
        );
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn large_payloads_get_compressed() {
        let msg = Message::Sync(SyncMessage::sync("blob", vec![7; 4096]));
        let frame = msg.to_frame(&Encoding::Bincode, true).unwrap();
        assert!(frame.is_compressed());
        assert!(frame.payload.len() < 4096);
        assert_eq!(Message::from_frame(&frame, &Encoding::Bincode, LIMIT).unwrap(), msg);

        let small = Message::Chat(ChatMessage::message("hi", "lobby"));
        let frame = small.to_frame(&Encoding::Bincode, true).unwrap();
        assert!(!frame.is_compressed());
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn compressed_payload_cant_inflate_past_limit() {
        let msg = Message::Sync(SyncMessage::sync("zeros", vec![0; 4 * LIMIT]));
        let frame = msg.to_frame(&Encoding::Bincode, true).unwrap();
        assert!(frame.payload.len() < LIMIT);
        match Message::from_frame(&frame, &Encoding::Bincode, LIMIT) {
            Err(Error::FrameTooLarge(_, limit)) => assert_eq!(limit, LIMIT),
            other => panic!("expected frame too large error, got: {:?}", other),
        }
    }

    #[test]
    fn truncated_payload_fails_decoding() {
        let msg = Message::Chat(ChatMessage::message("hello there", "lobby"));
        let mut frame = msg.to_frame(&Encoding::Bincode, false).unwrap();
        frame.payload.truncate(3);
        assert!(Message::from_frame(&frame, &Encoding::Bincode, LIMIT).is_err());
    }

    #[test]
    fn only_answerable_messages_take_response_ids() {
        let mut user = Message::User(UserMessage::new("time", Vec::new()));
        user.set_response_id(3).unwrap();
        assert_eq!(user.response_id(), Some(3));

        let mut chat = Message::Chat(ChatMessage::register("lobby"));
        assert!(chat.set_response_id(3).is_err());
        assert_eq!(chat.response_id(), None);
    }
}
