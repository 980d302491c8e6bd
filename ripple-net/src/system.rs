use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use fnv::FnvHashMap;
use id_pool::IdPool;

use crate::msg::{EchoMessage, Message, ResponseId};
use crate::network::NetworkHandle;
use crate::response::ResponseEvent;
use crate::service::{Service, ServiceRegistry};
use crate::util;
use crate::worker::{Worker, WorkerEvent};
use crate::{Error, Result};

/// Response event resolved with the reply message.
pub type PendingResponse = Arc<ResponseEvent<Message>>;

struct PendingRequests {
    ids: IdPool,
    events: FnvHashMap<ResponseId, (SocketAddr, PendingResponse)>,
}

impl PendingRequests {
    fn remove(&mut self, id: ResponseId) -> Option<PendingResponse> {
        let (_, event) = self.events.remove(&id)?;
        if self.ids.return_id(id).is_err() {
            warn!("failed returning response id {} to the pool", id);
        }
        Some(event)
    }
}

/// Default worker, routing every message to where it belongs.
///
/// Keep-alives are dropped, echoes are bounced back, replies and returned
/// echoes resolve pending requests. Application messages go to the services
/// in the registry, chat and sync services get created on demand.
pub struct SystemWorker {
    registry: Arc<ServiceRegistry>,
    pending: Mutex<PendingRequests>,
}

impl SystemWorker {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            pending: Mutex::new(PendingRequests {
                ids: IdPool::new(),
                events: FnvHashMap::default(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    fn network(&self) -> &NetworkHandle {
        self.registry.network()
    }

    /// Sends a request, returning the event resolved once the reply
    /// arrives.
    pub fn send_request(&self, remote: &SocketAddr, message: Message) -> Result<PendingResponse> {
        let event = Arc::new(ResponseEvent::new());
        self.send_request_with(remote, message, event.clone())?;
        Ok(event)
    }

    /// Sends a request to be resolved through the given response event.
    pub fn send_request_with(
        &self,
        remote: &SocketAddr,
        mut message: Message,
        event: PendingResponse,
    ) -> Result<()> {
        self.forget_disconnected();
        let id = {
            let mut pending = util::lock(&self.pending);
            let id = pending
                .ids
                .request_id()
                .ok_or(Error::RequestIdPoolExhausted)?;
            pending.events.insert(id, (*remote, event));
            id
        };
        let sent = message
            .set_response_id(id)
            .and_then(|_| self.network().send(remote, &message));
        if sent.is_err() {
            self.take_pending(id);
        }
        sent
    }

    /// Sends an echo, the returned event resolves when it comes back.
    pub fn ping(&self, remote: &SocketAddr) -> Result<PendingResponse> {
        self.send_request(remote, Message::Echo(EchoMessage::new(Vec::new())))
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        util::lock(&self.pending).events.len()
    }

    /// Stops waiting for the reply to a request, e.g. after giving up on
    /// it. Returns false if the request was already resolved or cancelled.
    pub fn cancel_request(&self, event: &PendingResponse) -> bool {
        let mut pending = util::lock(&self.pending);
        let id = pending
            .events
            .iter()
            .find(|(_, (_, e))| Arc::ptr_eq(e, event))
            .map(|(id, _)| *id);
        match id {
            Some(id) => pending.remove(id).is_some(),
            None => false,
        }
    }

    /// Drops requests sent over connections that are gone, their replies
    /// can't arrive anymore.
    fn forget_disconnected(&self) {
        let network = self.network();
        let mut pending = util::lock(&self.pending);
        let gone = pending
            .events
            .iter()
            .filter(|(_, (remote, _))| !network.is_connected(remote))
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in gone {
            if let Some((remote, _)) = pending.events.get(&id) {
                debug!("dropping request {}, {} is no longer connected", id, remote);
            }
            pending.remove(id);
        }
    }

    fn take_pending(&self, id: ResponseId) -> Option<PendingResponse> {
        util::lock(&self.pending).remove(id)
    }

    fn handle_response(&self, id: ResponseId, message: &Message, remote: &SocketAddr) {
        match self.take_pending(id) {
            Some(event) => event.handle_response(message.clone()),
            None => debug!("no pending request {} for reply from {}", id, remote),
        }
    }
}

impl Worker for SystemWorker {
    fn handle_event(&self, event: &WorkerEvent) -> Result<()> {
        let remote = &event.remote;
        match &event.message {
            Message::KeepAlive => (),
            Message::Echo(echo) => {
                if !echo.echoed {
                    let mut echo = echo.clone();
                    echo.received();
                    event.network.send(remote, &Message::Echo(echo))?;
                } else if let Some(id) = echo.response_id {
                    self.handle_response(id, &event.message, remote);
                } else {
                    debug!("echo returned from {}", remote);
                }
            }
            Message::Reply(reply) => self.handle_response(reply.response_id, &event.message, remote),
            Message::Chat(_) => self
                .registry
                .chat_or_default()
                .handle_message(&event.message, remote)?,
            Message::Sync(_) => self
                .registry
                .sync_or_default()
                .handle_message(&event.message, remote)?,
            Message::Grid(_) => match self.registry.grid() {
                Some(grid) => grid.handle_message(&event.message, remote)?,
                None => warn!("no grid service registered, dropping message from {}", remote),
            },
            Message::User(user) => match self.registry.user(&user.kind) {
                Some(service) => service.handle_message(&event.message, remote)?,
                None => warn!(
                    "no service registered for user messages of kind {}, dropping message from {}",
                    user.kind, remote
                ),
            },
        }
        Ok(())
    }
}
