mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use fnv::FnvHashMap;
use ripple_net::msg::UserMessage;
use ripple_net::{Encoding, FnWorker, Message, Network, WorkerEvent, WorkerPool};

use common::{test_config, wait_until, TIMEOUT};

const CLIENTS: usize = 4;
const MESSAGES: u32 = 250;

#[test]
fn messages_from_one_connection_arrive_in_order() {
    common::init_logging();

    let seen: Arc<Mutex<FnvHashMap<SocketAddr, Vec<u32>>>> = Default::default();
    let _seen = seen.clone();
    let mut server = Network::server_with_config("127.0.0.1:0", test_config()).unwrap();
    let pool = WorkerPool::with_threads(
        FnWorker(move |event: &WorkerEvent| -> ripple_net::Result<()> {
            if let Message::User(user) = &event.message {
                let n: u32 = user.unpack_payload(&Encoding::Bincode)?;
                _seen
                    .lock()
                    .unwrap()
                    .entry(event.remote)
                    .or_default()
                    .push(n);
            }
            Ok(())
        }),
        3,
    )
    .unwrap();
    server.start(pool).unwrap();

    let server_addr = server.local_addr();
    let senders = (0..CLIENTS)
        .map(|_| {
            std::thread::spawn(move || {
                let mut client = Network::client_with_config(server_addr, test_config()).unwrap();
                let discard = FnWorker(|_: &WorkerEvent| -> ripple_net::Result<()> { Ok(()) });
                client.start(WorkerPool::with_threads(discard, 1).unwrap()).unwrap();
                for n in 0..MESSAGES {
                    let msg = UserMessage::from_payload("seq", &n, &Encoding::Bincode).unwrap();
                    client.send_to_server(&msg.into()).unwrap();
                }
                client
            })
        })
        .collect::<Vec<_>>();
    // clients are kept alive until everything got through
    let clients = senders
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    assert!(wait_until(TIMEOUT, || {
        let seen = seen.lock().unwrap();
        seen.len() == CLIENTS && seen.values().all(|s| s.len() == MESSAGES as usize)
    }));
    let seen = seen.lock().unwrap();
    for client in &clients {
        let order = &seen[&client.local_addr()];
        assert_eq!(*order, (0..MESSAGES).collect::<Vec<_>>());
    }
}
