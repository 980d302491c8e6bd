#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use ripple_net::{Network, NetworkConfig, ServiceRegistry, SystemWorker, WorkerPool};
use simplelog::{Config, LevelFilter, TermLogger, TerminalMode};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    // fails if another test already set it up
    let _ = TermLogger::init(LevelFilter::Debug, Config::default(), TerminalMode::Mixed);
}

pub fn test_config() -> NetworkConfig {
    NetworkConfig {
        heartbeat_interval: Some(Duration::from_millis(200)),
        ..Default::default()
    }
}

/// Polls the condition until it holds or the timeout passes.
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Network with a registry and a running system worker.
pub struct Node {
    pub network: Network,
    pub registry: Arc<ServiceRegistry>,
    pub system: Arc<SystemWorker>,
}

impl Node {
    pub fn server() -> Node {
        let network = Network::server_with_config("127.0.0.1:0", test_config()).unwrap();
        Self::with_network(network)
    }

    pub fn client(server: &Node) -> Node {
        let network =
            Network::client_with_config(server.network.local_addr(), test_config()).unwrap();
        Self::with_network(network)
    }

    /// Wraps a network that needs a config of its own.
    pub fn with_network(network: Network) -> Node {
        let registry = Arc::new(ServiceRegistry::new(network.handle()));
        let system = Arc::new(SystemWorker::new(registry.clone()));
        Node {
            network,
            registry,
            system,
        }
    }

    /// Starts processing messages, services should be registered by now.
    pub fn start(&mut self) {
        let pool = WorkerPool::with_threads(self.system.clone(), 2).unwrap();
        self.network.start(pool).unwrap();
    }
}
