mod common;

use std::sync::Arc;

use crossbeam_channel::{unbounded, Sender};
use ripple_net::chat::ChatService;
use ripple_net::NetworkHandle;

use common::{wait_until, Node, TIMEOUT};

fn chat_with_channel(network: NetworkHandle, sender: Sender<(String, String)>) -> Arc<ChatService> {
    Arc::new(ChatService::new(network, move |msg: &str, room: &str| {
        let _ = sender.send((msg.to_string(), room.to_string()));
    }))
}

#[test]
fn lobby_message_reaches_other_client() {
    common::init_logging();

    let mut server = Node::server();
    let server_chat = Arc::new(ChatService::with_logging(server.network.handle()));
    server.registry.set_chat(server_chat.clone());
    server.start();

    let (sender_1, received_1) = unbounded();
    let mut client_1 = Node::client(&server);
    let chat_1 = chat_with_channel(client_1.network.handle(), sender_1);
    client_1.registry.set_chat(chat_1.clone());
    client_1.start();

    let (sender_2, received_2) = unbounded();
    let mut client_2 = Node::client(&server);
    let chat_2 = chat_with_channel(client_2.network.handle(), sender_2);
    client_2.registry.set_chat(chat_2.clone());
    client_2.start();

    chat_1.join("lobby").unwrap();
    chat_2.join("lobby").unwrap();
    assert!(wait_until(TIMEOUT, || server_chat.members("lobby").len() == 2));

    chat_1.say("hello", "lobby").unwrap();
    assert_eq!(
        received_2.recv_timeout(TIMEOUT).unwrap(),
        ("hello".to_string(), "lobby".to_string())
    );
    // sender gets its own message back too
    assert_eq!(
        received_1.recv_timeout(TIMEOUT).unwrap(),
        ("hello".to_string(), "lobby".to_string())
    );
}

#[test]
fn room_goes_away_when_everyone_leaves() {
    let mut server = Node::server();
    let server_chat = Arc::new(ChatService::with_logging(server.network.handle()));
    server.registry.set_chat(server_chat.clone());
    server.start();

    let mut client_1 = Node::client(&server);
    client_1.start();
    let mut client_2 = Node::client(&server);
    client_2.start();

    // clients rely on the default chat service
    let chat_1 = client_1.registry.chat_or_default();
    let chat_2 = client_2.registry.chat_or_default();

    chat_1.join("r").unwrap();
    chat_2.join("r").unwrap();
    assert!(wait_until(TIMEOUT, || server_chat.members("r").len() == 2));

    chat_1.leave("r").unwrap();
    assert!(wait_until(TIMEOUT, || server_chat.members("r").len() == 1));
    chat_2.leave("r").unwrap();
    assert!(wait_until(TIMEOUT, || !server_chat.has_room("r")));
}

#[test]
fn disconnected_members_are_swept_on_broadcast() {
    let mut server = Node::server();
    let server_chat = Arc::new(ChatService::with_logging(server.network.handle()));
    server.registry.set_chat(server_chat.clone());
    server.start();

    let (sender, received) = unbounded();
    let mut client_1 = Node::client(&server);
    let chat_1 = chat_with_channel(client_1.network.handle(), sender);
    client_1.registry.set_chat(chat_1.clone());
    client_1.start();

    let mut client_2 = Node::client(&server);
    client_2.start();
    let chat_2 = client_2.registry.chat_or_default();

    chat_1.join("r").unwrap();
    chat_2.join("r").unwrap();
    assert!(wait_until(TIMEOUT, || server_chat.members("r").len() == 2));

    let gone = client_2.network.local_addr();
    drop(chat_2);
    drop(client_2);
    assert!(wait_until(TIMEOUT, || !server.network.is_connected(&gone)));

    chat_1.say("anyone?", "r").unwrap();
    received.recv_timeout(TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || server_chat.members("r")
        == vec![client_1.network.local_addr()]));
}
