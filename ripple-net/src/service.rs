//! Services are application protocols built on top of the network.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use fnv::FnvHashMap;

use crate::chat::ChatService;
use crate::msg::Message;
use crate::network::NetworkHandle;
use crate::sync::SyncService;
use crate::util;
use crate::Result;

/// Application-level message handler.
///
/// Services are handed messages of the kind they registered for. They keep
/// their own state and reply through the network handle they were built
/// with.
pub trait Service: Send + Sync {
    fn handle_message(&self, message: &Message, remote: &SocketAddr) -> Result<()>;
}

/// Set of services active on a single network.
///
/// Holds at most one chat, one sync and one grid service, plus any number
/// of user services keyed by the kind of user message they handle.
/// Registering a service of a kind replaces the previous one.
pub struct ServiceRegistry {
    network: NetworkHandle,
    chat: RwLock<Option<Arc<ChatService>>>,
    sync: RwLock<Option<Arc<SyncService>>>,
    grid: RwLock<Option<Arc<dyn Service>>>,
    user: RwLock<FnvHashMap<String, Arc<dyn Service>>>,
}

impl ServiceRegistry {
    pub fn new(network: NetworkHandle) -> Self {
        Self {
            network,
            chat: RwLock::new(None),
            sync: RwLock::new(None),
            grid: RwLock::new(None),
            user: RwLock::new(FnvHashMap::default()),
        }
    }

    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    /// Registers the chat service, returning the one it replaced.
    pub fn set_chat(&self, service: Arc<ChatService>) -> Option<Arc<ChatService>> {
        util::write(&self.chat).replace(service)
    }

    pub fn chat(&self) -> Option<Arc<ChatService>> {
        util::read(&self.chat).clone()
    }

    /// Returns the chat service, creating and registering a default one
    /// if there's none.
    pub fn chat_or_default(&self) -> Arc<ChatService> {
        let mut chat = util::write(&self.chat);
        chat.get_or_insert_with(|| {
            debug!("no chat service registered, creating default one");
            Arc::new(ChatService::with_logging(self.network.clone()))
        })
        .clone()
    }

    pub fn set_sync(&self, service: Arc<SyncService>) -> Option<Arc<SyncService>> {
        util::write(&self.sync).replace(service)
    }

    pub fn sync(&self) -> Option<Arc<SyncService>> {
        util::read(&self.sync).clone()
    }

    /// Returns the sync service, creating and registering an empty one if
    /// there's none.
    pub fn sync_or_default(&self) -> Arc<SyncService> {
        let mut sync = util::write(&self.sync);
        sync.get_or_insert_with(|| {
            debug!("no sync service registered, creating default one");
            Arc::new(SyncService::new(self.network.clone()))
        })
        .clone()
    }

    /// Registers the grid service, either the worker or the coordinator
    /// side.
    pub fn set_grid(&self, service: Arc<dyn Service>) -> Option<Arc<dyn Service>> {
        util::write(&self.grid).replace(service)
    }

    pub fn grid(&self) -> Option<Arc<dyn Service>> {
        util::read(&self.grid).clone()
    }

    /// Registers a service for user messages of the given kind.
    pub fn set_user(&self, kind: &str, service: Arc<dyn Service>) -> Option<Arc<dyn Service>> {
        util::write(&self.user).insert(kind.to_string(), service)
    }

    pub fn remove_user(&self, kind: &str) -> Option<Arc<dyn Service>> {
        util::write(&self.user).remove(kind)
    }

    pub fn user(&self, kind: &str) -> Option<Arc<dyn Service>> {
        util::read(&self.user).get(kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    struct Nop;

    impl Service for Nop {
        fn handle_message(&self, _: &Message, _: &SocketAddr) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn defaults_are_created_once() {
        let network = Network::server("127.0.0.1:0").unwrap();
        let registry = ServiceRegistry::new(network.handle());
        assert!(registry.chat().is_none());
        let chat = registry.chat_or_default();
        assert!(Arc::ptr_eq(&chat, &registry.chat_or_default()));
        assert!(Arc::ptr_eq(&registry.sync_or_default(), &registry.sync_or_default()));
    }

    #[test]
    fn registering_replaces() {
        let network = Network::server("127.0.0.1:0").unwrap();
        let registry = ServiceRegistry::new(network.handle());
        let first = Arc::new(SyncService::new(network.handle()));
        assert!(registry.set_sync(first.clone()).is_none());
        let replaced = registry.set_sync(Arc::new(SyncService::new(network.handle())));
        assert!(Arc::ptr_eq(&replaced.unwrap(), &first));

        assert!(registry.set_user("time", Arc::new(Nop)).is_none());
        assert!(registry.user("time").is_some());
        assert!(registry.remove_user("time").is_some());
        assert!(registry.user("time").is_none());
    }
}
