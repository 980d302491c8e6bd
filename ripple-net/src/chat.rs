//! Chat rooms.
//!
//! The server keeps track of which connections are registered to which room
//! and forwards every message sent to a room to all of its members, the
//! sender included. Rooms are created on first registration and removed
//! once their last member leaves.

use std::net::SocketAddr;
use std::sync::Mutex;

use fnv::FnvHashMap;

use crate::msg::{ChatMessage, ChatMessageType, Message};
use crate::network::{NetworkHandle, Role};
use crate::service::Service;
use crate::util;
use crate::{Error, Result};

pub use crate::msg::chat::MAIN_ROOM;

/// Gets notified about every chat message received.
pub trait ChatListener: Send + Sync {
    fn message_action(&self, msg: &str, room: &str);
}

impl<F> ChatListener for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn message_action(&self, msg: &str, room: &str) {
        self(msg, room)
    }
}

pub struct ChatService {
    network: NetworkHandle,
    rooms: Mutex<FnvHashMap<String, Vec<SocketAddr>>>,
    listener: Box<dyn ChatListener>,
}

impl ChatService {
    pub fn new<L: ChatListener + 'static>(network: NetworkHandle, listener: L) -> Self {
        Self {
            network,
            rooms: Mutex::new(FnvHashMap::default()),
            listener: Box::new(listener),
        }
    }

    /// Creates a chat service that logs the received messages.
    pub fn with_logging(network: NetworkHandle) -> Self {
        Self::new(network, |msg: &str, room: &str| {
            info!("[{}] {}", room_name(room), msg)
        })
    }

    /// Adds the connection to a room, creating the room if needed.
    pub fn register_user(&self, room: &str, conn: &SocketAddr) {
        let mut rooms = util::lock(&self.rooms);
        let members = rooms.entry(room.to_string()).or_insert_with(|| {
            debug!("creating chat room: {}", room_name(room));
            Vec::new()
        });
        if !members.contains(conn) {
            members.push(*conn);
        }
    }

    /// Removes the connection from a room, deleting the room once it's
    /// empty. Returns `false` if the connection wasn't a member.
    pub fn unregister_user(&self, room: &str, conn: &SocketAddr) -> bool {
        let mut rooms = util::lock(&self.rooms);
        remove_member(&mut rooms, room, conn)
    }

    /// Removes the connection from every room it's registered to.
    pub fn unregister_everywhere(&self, conn: &SocketAddr) {
        let mut rooms = util::lock(&self.rooms);
        let names = rooms.keys().cloned().collect::<Vec<_>>();
        for room in names {
            remove_member(&mut rooms, &room, conn);
        }
    }

    pub fn rooms(&self) -> Vec<String> {
        util::lock(&self.rooms).keys().cloned().collect()
    }

    pub fn has_room(&self, room: &str) -> bool {
        util::lock(&self.rooms).contains_key(room)
    }

    pub fn members(&self, room: &str) -> Vec<SocketAddr> {
        util::lock(&self.rooms)
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    /// Registers to a room on the server.
    pub fn join(&self, room: &str) -> Result<()> {
        self.network
            .send_to_server(&Message::Chat(ChatMessage::register(room)))
    }

    pub fn leave(&self, room: &str) -> Result<()> {
        self.network
            .send_to_server(&Message::Chat(ChatMessage::unregister(room)))
    }

    /// Sends a message to a room on the server.
    pub fn say(&self, msg: &str, room: &str) -> Result<()> {
        self.network
            .send_to_server(&Message::Chat(ChatMessage::message(msg, room)))
    }

    /// Forwards the message to all members of its room. Members that are no
    /// longer connected are removed along the way.
    fn broadcast(&self, chat: &ChatMessage) {
        let message = Message::Chat(chat.clone());
        for member in self.members(&chat.room) {
            let result = if self.network.is_connected(&member) {
                self.network.send(&member, &message)
            } else {
                Err(Error::SocketNotConnected(member))
            };
            match result {
                Ok(()) => (),
                Err(Error::SocketNotConnected(_)) => {
                    debug!(
                        "removing disconnected {} from room {}",
                        member,
                        room_name(&chat.room)
                    );
                    self.unregister_user(&chat.room, &member);
                }
                Err(e) => warn!("failed forwarding chat message to {}: {}", member, e),
            }
        }
    }
}

impl Service for ChatService {
    fn handle_message(&self, message: &Message, remote: &SocketAddr) -> Result<()> {
        let chat = match message {
            Message::Chat(chat) => chat,
            _ => return Ok(()),
        };
        match chat.type_ {
            ChatMessageType::Message => {
                if self.network.role() == Role::Server {
                    self.broadcast(chat);
                }
                self.listener.message_action(&chat.msg, &chat.room);
            }
            ChatMessageType::Register => {
                trace!("{} registering to room {}", remote, room_name(&chat.room));
                self.register_user(&chat.room, remote);
            }
            ChatMessageType::Unregister => {
                trace!("{} leaving room {}", remote, room_name(&chat.room));
                self.unregister_user(&chat.room, remote);
            }
        }
        Ok(())
    }
}

fn remove_member(
    rooms: &mut FnvHashMap<String, Vec<SocketAddr>>,
    room: &str,
    conn: &SocketAddr,
) -> bool {
    let members = match rooms.get_mut(room) {
        Some(members) => members,
        None => return false,
    };
    let removed = match members.iter().position(|m| m == conn) {
        Some(idx) => {
            members.remove(idx);
            true
        }
        None => false,
    };
    if members.is_empty() {
        debug!("removing empty chat room: {}", room_name(room));
        rooms.remove(room);
    }
    removed
}

fn room_name(room: &str) -> &str {
    if room == MAIN_ROOM {
        "main"
    } else {
        room
    }
}
