//! This library provides a small message-oriented network framework.
//!
//! A [`Network`] multiplexes TCP connections on a single I/O thread, running
//! either in server role (accepting connections) or client role (one
//! connection to a known server). Every message decoded off a connection is
//! handed over as a [`WorkerEvent`] to a [`WorkerPool`], which runs a
//! [`Worker`] callback on its own threads so that socket I/O never waits on
//! application logic.
//!
//! The default worker, [`SystemWorker`], takes care of the system messages
//! (keep-alives, echoes and replies to pending requests) and routes the rest
//! to the services held in a [`ServiceRegistry`]:
//!
//! - [`ChatService`](chat::ChatService) for chat rooms with server side
//!   broadcast,
//! - [`SyncService`](sync::SyncService) for pushing object state to peers,
//! - [`GridClient`](grid::GridClient) and [`GridServer`](grid::GridServer)
//!   for farming out computation jobs to workers,
//! - user services handling [`UserMessage`](msg::UserMessage)s of a given
//!   kind.
//!
//! Callers that need synchronous semantics can use
//! [`SystemWorker::send_request`], blocking on the returned
//! [`ResponseEvent`] until the reply arrives.
//!
//!
//! # Putting it together
//!
//! ```no_run
//! use std::sync::Arc;
//! use ripple_net::{chat::ChatService, Network, ServiceRegistry, SystemWorker, WorkerPool};
//!
//! # fn main() -> ripple_net::Result<()> {
//! let mut network = Network::server("127.0.0.1:9123")?;
//! let registry = Arc::new(ServiceRegistry::new(network.handle()));
//! registry.set_chat(Arc::new(ChatService::with_logging(network.handle())));
//! network.start(WorkerPool::new(SystemWorker::new(registry))?)?;
//! # Ok(())
//! # }
//! ```
//!
//!
//! # Encodings
//!
//! Message payloads are encoded with `bincode` by default. Enabling the
//! `msgpack_encoding` or `json_encoding` crate features makes the respective
//! [`Encoding`] variants available. Both ends of a connection need to use
//! the same encoding.

#[macro_use]
extern crate log;

pub mod chat;
pub mod grid;
pub mod msg;
pub mod sync;

mod error;
mod network;
mod response;
mod service;
mod socket;
mod system;
mod util;
mod worker;

pub use error::{Error, Result};
pub use msg::Message;
pub use network::{ConnectionInfo, Network, NetworkConfig, NetworkHandle, Role};
pub use response::{ResponseEvent, ResponseHandler};
pub use service::{Service, ServiceRegistry};
pub use socket::{pack, unpack, Encoding, Frame, FrameDecoder};
pub use system::{PendingResponse, SystemWorker};
pub use util::Ticker;
pub use worker::{default_threads, Dispatch, FnWorker, Worker, WorkerEvent, WorkerPool};
