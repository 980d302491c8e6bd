//! Network core.
//!
//! A [`Network`] owns a set of TCP connections, either accepted from a
//! listener (server role) or a single one opened at construction (client
//! role). A dedicated I/O thread reads frames off the connections, decodes
//! them and hands every message over to a [`Dispatch`] implementation,
//! usually a [`WorkerPool`](crate::WorkerPool).
//!
//! Other threads talk to the I/O thread through a cloneable
//! [`NetworkHandle`], which enqueues outgoing messages and reads a snapshot
//! of the connection table.

use std::fmt::{Display, Formatter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Sender};
use fnv::FnvHashMap;

use crate::msg::Message;
use crate::socket::tcp::ConnectionHandler;
use crate::socket::Encoding;
use crate::util;
use crate::worker::Dispatch;
use crate::{Error, Result};

/// Side of the connection a network plays.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// Accepts any number of inbound connections
    Server,
    /// Holds a single outbound connection
    Client,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Configuration settings for a network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Encoding scheme used for message payloads, needs to be the same on
    /// both ends of a connection
    pub encoding: Encoding,
    /// Compress larger payloads before sending
    pub compress: bool,
    /// Interval at which keep-alive messages are sent on every connection
    pub heartbeat_interval: Option<Duration>,
    /// Connections with no incoming message for this long get closed
    pub idle_timeout: Option<Duration>,
    /// Time the I/O thread sleeps between polls
    pub poll_wait: Duration,
    /// Size of the buffer used for a single read from a stream
    pub read_buffer_size: usize,
    /// Frames announcing a larger payload are treated as malformed
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::Bincode,
            compress: false,
            heartbeat_interval: Some(Duration::from_secs(1)),
            idle_timeout: Some(Duration::from_secs(10)),
            poll_wait: Duration::from_millis(1),
            read_buffer_size: 8192,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

/// Snapshot of a single connection's state.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub addr: SocketAddr,
    /// Wall-clock time the connection was established
    pub connected_at: DateTime<Utc>,
    /// Updated on every successfully decoded message
    pub last_message_received: Instant,
    pub messages_received: u64,
    pub messages_sent: u64,
}

impl ConnectionInfo {
    pub(crate) fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connected_at: Utc::now(),
            last_message_received: Instant::now(),
            messages_received: 0,
            messages_sent: 0,
        }
    }
}

/// Instruction for the I/O thread.
pub(crate) enum Command {
    Send(SocketAddr, Vec<u8>),
    Broadcast(Vec<u8>),
    Close(SocketAddr),
    Shutdown,
}

/// State shared between the I/O thread and all the handles.
pub(crate) struct Shared {
    pub role: Role,
    pub local_addr: SocketAddr,
    pub remote_addr: Option<SocketAddr>,
    pub config: NetworkConfig,
    /// Written only by the I/O thread
    pub connections: RwLock<FnvHashMap<SocketAddr, ConnectionInfo>>,
    pub commands: Sender<Command>,
    pub running: AtomicBool,
}

impl Shared {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Cloneable handle for sending messages through a network and inspecting
/// its connections.
#[derive(Clone)]
pub struct NetworkHandle {
    pub(crate) shared: Arc<Shared>,
}

impl NetworkHandle {
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    pub fn encoding(&self) -> &Encoding {
        &self.shared.config.encoding
    }

    /// Address of the listener for the server role, address of the local
    /// end of the connection for the client role.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Address of the server, for client role only.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_connected(&self, addr: &SocketAddr) -> bool {
        util::read(&self.shared.connections).contains_key(addr)
    }

    pub fn connections(&self) -> Vec<SocketAddr> {
        util::read(&self.shared.connections).keys().cloned().collect()
    }

    pub fn connection_info(&self, addr: &SocketAddr) -> Option<ConnectionInfo> {
        util::read(&self.shared.connections).get(addr).cloned()
    }

    /// Queues a message for sending to the given connection.
    ///
    /// Never blocks, the actual write happens on the I/O thread.
    pub fn send(&self, addr: &SocketAddr, msg: &Message) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NetworkShutdown);
        }
        if !self.is_connected(addr) {
            return Err(Error::SocketNotConnected(*addr));
        }
        let bytes = self.encode(msg)?;
        trace!("sending {:?} message ({} bytes) to {}", msg.type_(), bytes.len(), addr);
        self.command(Command::Send(*addr, bytes))
    }

    /// Sends a message over the one connection of a client role network.
    pub fn send_to_server(&self, msg: &Message) -> Result<()> {
        match self.shared.remote_addr {
            Some(addr) => self.send(&addr, msg),
            None => Err(Error::WrongRole(self.role())),
        }
    }

    /// Queues a message for every live connection.
    pub fn broadcast(&self, msg: &Message) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NetworkShutdown);
        }
        let bytes = self.encode(msg)?;
        trace!("broadcasting {:?} message ({} bytes)", msg.type_(), bytes.len());
        self.command(Command::Broadcast(bytes))
    }

    /// Flushes whatever is pending for the connection and closes it.
    pub fn close_connection(&self, addr: &SocketAddr) -> Result<()> {
        if !self.is_connected(addr) {
            return Err(Error::SocketNotConnected(*addr));
        }
        self.command(Command::Close(*addr))
    }

    /// Encodes the message, refusing payloads the receiving end would
    /// reject or the length header can't represent.
    fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        let config = &self.shared.config;
        let frame = msg.to_frame(&config.encoding, config.compress)?;
        let limit = config.max_frame_size.min(u32::MAX as usize);
        if frame.payload.len() > limit {
            return Err(Error::FrameTooLarge(frame.payload.len(), limit));
        }
        Ok(frame.to_bytes())
    }

    fn command(&self, command: Command) -> Result<()> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| Error::NetworkShutdown)
    }
}

/// Network core owning the sockets and the I/O thread.
///
/// Construction happens in two phases: `server`/`client` binds or connects,
/// making a [`NetworkHandle`] available for building services, and `start`
/// spawns the I/O thread that starts feeding messages to the dispatcher.
///
/// Dropping the network shuts it down.
pub struct Network {
    handle: NetworkHandle,
    handler: Option<ConnectionHandler>,
    poll_handle: Option<JoinHandle<()>>,
}

impl Network {
    /// Binds a server role network to the given address.
    pub fn server<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::server_with_config(addr, NetworkConfig::default())
    }

    pub fn server_with_config<A: ToSocketAddrs>(addr: A, config: NetworkConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("listening for connections on: {}", local_addr);
        Self::assemble(Role::Server, local_addr, None, Some(listener), None, config)
    }

    /// Connects a client role network to the server at the given address.
    pub fn client<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::client_with_config(addr, NetworkConfig::default())
    }

    pub fn client_with_config<A: ToSocketAddrs>(addr: A, config: NetworkConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        info!("connected to: {} (local address: {})", remote_addr, local_addr);
        Self::assemble(
            Role::Client,
            local_addr,
            Some(remote_addr),
            None,
            Some(stream),
            config,
        )
    }

    fn assemble(
        role: Role,
        local_addr: SocketAddr,
        remote_addr: Option<SocketAddr>,
        listener: Option<TcpListener>,
        stream: Option<TcpStream>,
        config: NetworkConfig,
    ) -> Result<Self> {
        let (commands, command_receiver) = unbounded();
        let shared = Arc::new(Shared {
            role,
            local_addr,
            remote_addr,
            config,
            connections: RwLock::new(FnvHashMap::default()),
            commands,
            running: AtomicBool::new(true),
        });
        let mut handler = ConnectionHandler::new(shared.clone(), listener, command_receiver);
        if let Some(stream) = stream {
            handler.add_connection(stream)?;
        }
        Ok(Self {
            handle: NetworkHandle { shared },
            handler: Some(handler),
            poll_handle: None,
        })
    }

    pub fn handle(&self) -> NetworkHandle {
        self.handle.clone()
    }

    /// Spawns the I/O thread, handing every decoded message to the
    /// dispatcher.
    pub fn start<D: Dispatch + 'static>(&mut self, dispatch: D) -> Result<()> {
        let mut handler = self.handler.take().ok_or(Error::AlreadyStarted)?;
        handler.set_dispatch(Box::new(dispatch));
        let poll_handle = std::thread::Builder::new()
            .name(format!("ripple-io-{}", self.handle.local_addr()))
            .spawn(move || handler.start_polling())?;
        self.poll_handle = Some(poll_handle);
        Ok(())
    }

    /// Stops the I/O thread, closing all the connections. Messages already
    /// handed to the dispatcher are still processed.
    pub fn shutdown(&mut self) {
        if !self.handle.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("shutting down {} network at {}", self.role(), self.local_addr());
        let _ = self.handle.shared.commands.send(Command::Shutdown);
        if let Some(poll_handle) = self.poll_handle.take() {
            if poll_handle.join().is_err() {
                error!("network I/O thread panicked");
            }
        }
        // never started, close the connections directly
        if let Some(mut handler) = self.handler.take() {
            handler.close_all();
        }
    }
}

impl Deref for Network {
    type Target = NetworkHandle;
    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.shutdown();
    }
}
