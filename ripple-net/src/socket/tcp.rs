use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Instant;

use crossbeam_channel::Receiver;
use fnv::FnvHashMap;

use crate::msg::Message;
use crate::network::{Command, ConnectionInfo, NetworkHandle, Shared};
use crate::socket::FrameDecoder;
use crate::util;
use crate::worker::{Dispatch, WorkerEvent};
use crate::Result;

/// Upper bound on reads from a single stream during one poll, so that one
/// busy peer can't starve the others.
const MAX_READS_PER_POLL: usize = 64;

/// Single TCP connection as seen by the I/O thread.
struct Connection {
    stream: TcpStream,
    decoder: FrameDecoder,
    /// Bytes waiting to be written, partial writes leave the rest here
    write_buffer: Vec<u8>,
    info: ConnectionInfo,
    /// Info changed since it was last published
    dirty: bool,
}

impl Connection {
    fn new(stream: TcpStream, addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(max_frame_size),
            write_buffer: Vec::new(),
            info: ConnectionInfo::new(addr),
            dirty: false,
        }
    }

    /// Reads what's currently available on the stream into the frame
    /// decoder. Returns `false` if the peer closed the stream.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        for _ in 0..MAX_READS_PER_POLL {
            match self.stream.read(buf) {
                Ok(0) => return Ok(false),
                Ok(count) => self.decoder.extend(&buf[..count]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn queue(&mut self, bytes: &[u8]) {
        self.write_buffer.extend_from_slice(bytes);
        self.info.messages_sent += 1;
        self.dirty = true;
    }

    /// Writes as much of the pending data as the stream accepts without
    /// blocking.
    fn flush(&mut self) -> io::Result<()> {
        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "stream closed")),
                Ok(count) => {
                    self.write_buffer.drain(..count);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Owns the sockets of a network and runs on its I/O thread.
pub(crate) struct ConnectionHandler {
    shared: Arc<Shared>,
    listener: Option<TcpListener>,
    connections: FnvHashMap<SocketAddr, Connection>,
    commands: Receiver<Command>,
    dispatch: Option<Box<dyn Dispatch>>,
    read_buffer: Vec<u8>,
    last_heartbeat: Instant,
}

impl ConnectionHandler {
    pub fn new(
        shared: Arc<Shared>,
        listener: Option<TcpListener>,
        commands: Receiver<Command>,
    ) -> Self {
        let read_buffer = vec![0; shared.config.read_buffer_size.max(1)];
        Self {
            shared,
            listener,
            connections: FnvHashMap::default(),
            commands,
            dispatch: None,
            read_buffer,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn set_dispatch(&mut self, dispatch: Box<dyn Dispatch>) {
        self.dispatch = Some(dispatch);
    }

    pub fn add_connection(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let addr = stream.peer_addr()?;
        let connection = Connection::new(stream, addr, self.shared.config.max_frame_size);
        util::write(&self.shared.connections).insert(addr, connection.info.clone());
        self.connections.insert(addr, connection);
        Ok(())
    }

    pub fn start_polling(&mut self) {
        info!(
            "starting {} network I/O at {}",
            self.shared.role, self.shared.local_addr
        );
        while self.shared.is_running() {
            if let Err(e) = self.manual_poll() {
                error!("manual_poll error: {}", e);
            }
            sleep(self.shared.config.poll_wait);
        }
        // messages queued before shutdown still go out
        self.handle_commands();
        self.close_all();
        // lets the dispatcher drain before the thread exits
        self.dispatch.take();
        info!("network I/O at {} stopped", self.shared.local_addr);
    }

    /// Performs all the necessary operations to maintain the connections.
    pub fn manual_poll(&mut self) -> Result<()> {
        self.accept_connections()?;
        self.handle_commands();
        self.send_heartbeats();
        self.read_connections();
        self.write_connections();
        self.drop_idle_connections();
        self.publish();
        Ok(())
    }

    fn accept_connections(&mut self) -> Result<()> {
        let mut accepted = Vec::new();
        if let Some(listener) = &self.listener {
            loop {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        info!("accepting new connection: {}", addr);
                        accepted.push(stream);
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("failed accepting connection: {}", e);
                        break;
                    }
                }
            }
        }
        for stream in accepted {
            if let Err(e) = self.add_connection(stream) {
                warn!("failed setting up accepted connection: {}", e);
            }
        }
        Ok(())
    }

    fn handle_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(addr, bytes) => match self.connections.get_mut(&addr) {
                    Some(connection) => connection.queue(&bytes),
                    None => debug!("dropping message for closed connection: {}", addr),
                },
                Command::Broadcast(bytes) => {
                    for connection in self.connections.values_mut() {
                        connection.queue(&bytes);
                    }
                }
                Command::Close(addr) => {
                    if let Some(connection) = self.connections.get_mut(&addr) {
                        if let Err(e) = connection.flush() {
                            debug!("failed flushing {} before closing: {}", addr, e);
                        }
                    }
                    self.remove_connection(&addr, "closed locally");
                }
                Command::Shutdown => break,
            }
        }
    }

    fn send_heartbeats(&mut self) {
        let interval = match self.shared.config.heartbeat_interval {
            Some(interval) => interval,
            None => return,
        };
        if self.last_heartbeat.elapsed() < interval {
            return;
        }
        self.last_heartbeat = Instant::now();
        match Message::KeepAlive.to_bytes(&self.shared.config.encoding, false) {
            Ok(bytes) => {
                for connection in self.connections.values_mut() {
                    connection.queue(&bytes);
                }
            }
            Err(e) => error!("failed encoding keep-alive: {}", e),
        }
    }

    /// Reads from all the connections, dispatching every decoded message.
    ///
    /// Frames that arrived before the peer closed the stream are still
    /// dispatched.
    fn read_connections(&mut self) {
        let encoding = self.shared.config.encoding;
        let max_frame_size = self.shared.config.max_frame_size;
        let mut closed = Vec::new();
        for (addr, connection) in self.connections.iter_mut() {
            let open = match connection.read_available(&mut self.read_buffer) {
                Ok(open) => open,
                Err(e) => {
                    closed.push((*addr, format!("read failed: {}", e)));
                    continue;
                }
            };
            loop {
                let frame = match connection.decoder.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        closed.push((*addr, format!("malformed frame: {}", e)));
                        break;
                    }
                };
                let message = match Message::from_frame(&frame, &encoding, max_frame_size) {
                    Ok(message) => message,
                    Err(e) => {
                        closed.push((*addr, format!("malformed frame: {}", e)));
                        break;
                    }
                };
                connection.info.last_message_received = Instant::now();
                connection.info.messages_received += 1;
                connection.dirty = true;
                match &self.dispatch {
                    Some(dispatch) => dispatch.dispatch(WorkerEvent {
                        network: NetworkHandle {
                            shared: self.shared.clone(),
                        },
                        remote: *addr,
                        message,
                    }),
                    None => trace!("no dispatcher set, dropping message from {}", addr),
                }
            }
            if !open {
                closed.push((*addr, "closed by peer".to_string()));
            }
        }
        for (addr, reason) in closed {
            self.remove_connection(&addr, &reason);
        }
    }

    fn write_connections(&mut self) {
        let mut closed = Vec::new();
        for (addr, connection) in self.connections.iter_mut() {
            if let Err(e) = connection.flush() {
                closed.push((*addr, format!("write failed: {}", e)));
            }
        }
        for (addr, reason) in closed {
            self.remove_connection(&addr, &reason);
        }
    }

    fn drop_idle_connections(&mut self) {
        let timeout = match self.shared.config.idle_timeout {
            Some(timeout) => timeout,
            None => return,
        };
        let idle = self
            .connections
            .iter()
            .filter(|(_, c)| c.info.last_message_received.elapsed() > timeout)
            .map(|(addr, _)| *addr)
            .collect::<Vec<_>>();
        for addr in idle {
            self.remove_connection(&addr, "idle timeout");
        }
    }

    /// Copies changed connection info into the shared table.
    fn publish(&mut self) {
        if !self.connections.values().any(|c| c.dirty) {
            return;
        }
        let mut table = util::write(&self.shared.connections);
        for (addr, connection) in self.connections.iter_mut().filter(|(_, c)| c.dirty) {
            connection.dirty = false;
            table.insert(*addr, connection.info.clone());
        }
    }

    fn remove_connection(&mut self, addr: &SocketAddr, reason: &str) {
        if let Some(connection) = self.connections.remove(addr) {
            let _ = connection.stream.shutdown(Shutdown::Both);
            util::write(&self.shared.connections).remove(addr);
            info!(
                "connection {} dropped: {} (remaining connections: {})",
                addr,
                reason,
                self.connections.len()
            );
            if Some(*addr) == self.shared.remote_addr {
                warn!("lost connection to server at {}", addr);
            }
        }
    }

    /// Flushes what can be flushed and closes every connection.
    pub fn close_all(&mut self) {
        for connection in self.connections.values_mut() {
            let _ = connection.flush();
            let _ = connection.stream.shutdown(Shutdown::Both);
        }
        self.connections.clear();
        util::write(&self.shared.connections).clear();
    }
}
