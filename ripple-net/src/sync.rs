//! Object state synchronization.
//!
//! Objects registered with the [`SyncService`] push their full state to all
//! peers on every [`sync`](SyncService::sync) call and apply the state they
//! receive from others.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fnv::FnvHashMap;

use crate::msg::{Message, SyncMessage, SyncMessageType};
use crate::network::NetworkHandle;
use crate::service::Service;
use crate::util::{self, Ticker};
use crate::{Error, Result};

/// Object that can have its state synchronized across the network.
pub trait ObjectSync: Send + Sync {
    /// Network-wide identifier of the object.
    fn id(&self) -> &str;

    /// Creates a message carrying the object's current state.
    fn sync_message(&self) -> Result<SyncMessage>;

    /// Applies state received from a peer.
    fn sync_object(&self, message: &SyncMessage) -> Result<()>;

    /// Called when a peer removes the object.
    fn remove(&self) {}

    /// Sends the object's state to all peers.
    fn send_sync(&self, network: &NetworkHandle) -> Result<()> {
        network.broadcast(&Message::Sync(self.sync_message()?))
    }
}

pub struct SyncService {
    network: NetworkHandle,
    objects: Mutex<FnvHashMap<String, Arc<dyn ObjectSync>>>,
}

impl SyncService {
    pub fn new(network: NetworkHandle) -> Self {
        Self {
            network,
            objects: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Registers an object, replacing any object with the same id.
    pub fn add_sync_object(&self, object: Arc<dyn ObjectSync>) -> Option<Arc<dyn ObjectSync>> {
        let id = object.id().to_string();
        let replaced = util::lock(&self.objects).insert(id.clone(), object);
        if replaced.is_some() {
            debug!("replaced sync object: {}", id);
        }
        replaced
    }

    /// Unregisters an object and runs its teardown.
    pub fn remove_sync_object(&self, id: &str) -> Result<()> {
        let object = util::lock(&self.objects)
            .remove(id)
            .ok_or_else(|| Error::NoSuchSyncObject(id.to_string()))?;
        object.remove();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ObjectSync>> {
        util::lock(&self.objects).get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        util::lock(&self.objects).contains_key(id)
    }

    pub fn len(&self) -> usize {
        util::lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Asks every registered object to send its state. Returns the number of
    /// objects synced, failures are logged.
    pub fn sync(&self) -> usize {
        let objects = util::lock(&self.objects).values().cloned().collect::<Vec<_>>();
        let mut synced = 0;
        for object in objects {
            match object.send_sync(&self.network) {
                Ok(()) => synced += 1,
                Err(e) => warn!("failed syncing object {}: {}", object.id(), e),
            }
        }
        synced
    }

    /// Tells all peers to remove the object with the given id.
    pub fn send_remove(&self, id: &str) -> Result<()> {
        self.network.broadcast(&Message::Sync(SyncMessage::remove(id)))
    }

    /// Starts a thread calling [`sync`](SyncService::sync) at the given
    /// interval, until the returned ticker is dropped.
    pub fn start_driver(self: &Arc<Self>, interval: Duration) -> Result<Ticker> {
        let service = self.clone();
        Ticker::start("ripple-sync", interval, move || {
            service.sync();
        })
    }
}

impl Service for SyncService {
    fn handle_message(&self, message: &Message, remote: &SocketAddr) -> Result<()> {
        let sync = match message {
            Message::Sync(sync) => sync,
            _ => return Ok(()),
        };
        match sync.type_ {
            SyncMessageType::Sync => match self.get(&sync.id) {
                Some(object) => object.sync_object(sync),
                None => {
                    trace!("ignoring sync from {} for unknown object: {}", remote, sync.id);
                    Ok(())
                }
            },
            SyncMessageType::Remove => {
                debug!("{} removed sync object: {}", remote, sync.id);
                self.remove_sync_object(&sync.id)
            }
        }
    }
}
