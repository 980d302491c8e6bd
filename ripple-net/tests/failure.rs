mod common;

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use ripple_net::{Message, Network, NetworkConfig};

use common::{wait_until, Node, TIMEOUT};

fn started_server() -> Node {
    common::init_logging();
    let mut server = Node::server();
    server.start();
    server
}

/// Opens a raw stream and waits for the server to register it.
fn raw_connection(server: &Node) -> TcpStream {
    let stream = TcpStream::connect(server.network.local_addr()).unwrap();
    let addr = stream.local_addr().unwrap();
    assert!(wait_until(TIMEOUT, || server.network.is_connected(&addr)));
    stream
}

fn assert_still_serving(server: &Node) {
    let mut client = Node::client(server);
    client.start();
    let server_addr = client.network.remote_addr().unwrap();
    let pending = client.system.ping(&server_addr).unwrap();
    match pending.wait_for_response_timeout(TIMEOUT) {
        Some(Message::Echo(echo)) => assert!(echo.echoed),
        other => panic!("expected echo, got {:?}", other),
    }
}

#[test]
fn unknown_message_kind_closes_only_that_connection() {
    let server = started_server();
    let mut other = Node::client(&server);
    other.start();
    assert!(wait_until(TIMEOUT, || server.network.connections().len() == 1));

    let mut stream = raw_connection(&server);
    let addr = stream.local_addr().unwrap();
    // kind 255, no flags, empty payload
    stream.write_all(&[255, 0, 0, 0, 0, 0]).unwrap();

    assert!(wait_until(TIMEOUT, || !server.network.is_connected(&addr)));
    assert_eq!(server.network.connections().len(), 1);
    assert!(other.network.is_connected(&server.network.local_addr()));
    assert_still_serving(&server);
}

#[test]
fn oversized_length_header_closes_the_connection() {
    let server = started_server();
    let mut stream = raw_connection(&server);
    let addr = stream.local_addr().unwrap();
    // echo announcing a 4GB payload
    stream.write_all(&[1, 0, 0xff, 0xff, 0xff, 0xff]).unwrap();

    assert!(wait_until(TIMEOUT, || !server.network.is_connected(&addr)));
    assert_still_serving(&server);
}

#[test]
fn garbage_payload_closes_the_connection() {
    let server = started_server();
    let mut stream = raw_connection(&server);
    let addr = stream.local_addr().unwrap();
    // chat frame with bytes that don't decode into a chat message
    stream.write_all(&[10, 0, 3, 0, 0, 0, 0xff, 0xff, 0xff]).unwrap();

    assert!(wait_until(TIMEOUT, || !server.network.is_connected(&addr)));
    assert_still_serving(&server);
}

#[test]
fn silent_connection_times_out() {
    common::init_logging();
    let config = NetworkConfig {
        heartbeat_interval: None,
        idle_timeout: Some(Duration::from_millis(300)),
        ..NetworkConfig::default()
    };
    let network = Network::server_with_config("127.0.0.1:0", config).unwrap();
    let mut server = Node::with_network(network);
    server.start();

    let stream = raw_connection(&server);
    let addr = stream.local_addr().unwrap();
    assert!(wait_until(TIMEOUT, || !server.network.is_connected(&addr)));
    assert!(server.network.connections().is_empty());
}
