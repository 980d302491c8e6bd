//! Optional configuration file, applied over the library defaults.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use ripple_net::grid::GridConfig;
use ripple_net::{Encoding, NetworkConfig};

/// Settings read from a toml file. Every field can be left out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Payload encoding, one of `bincode`, `msgpack` or `json`
    pub encoding: String,
    pub compress: bool,
    /// Keep-alive interval in milliseconds, 0 disables keep-alives
    pub heartbeat: u64,
    /// Idle connection timeout in milliseconds, 0 keeps idle connections
    /// open forever
    pub idle_timeout: u64,
    /// Time the I/O thread sleeps between polls, in milliseconds
    pub poll_wait: u64,
    pub max_frame_size: usize,
    /// Threads processing incoming messages, defaults to the number of
    /// available processors
    pub worker_threads: Option<usize>,
    pub grid: GridSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridSection {
    /// Seconds after which an unreported job is handed out again
    pub job_timeout: u64,
    /// Seconds between checks for timed out jobs
    pub maintenance_interval: u64,
    /// Failed jobs are dropped after being handed out this many times
    pub max_attempts: u32,
    /// Compute threads used by a grid worker
    pub threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        let network = NetworkConfig::default();
        Self {
            encoding: network.encoding.to_string(),
            compress: network.compress,
            heartbeat: millis(network.heartbeat_interval),
            idle_timeout: millis(network.idle_timeout),
            poll_wait: network.poll_wait.as_millis() as u64,
            max_frame_size: network.max_frame_size,
            worker_threads: None,
            grid: GridSection::default(),
        }
    }
}

impl Default for GridSection {
    fn default() -> Self {
        let grid = GridConfig::default();
        Self {
            job_timeout: grid.job_timeout.as_secs(),
            maintenance_interval: grid.maintenance_interval.as_secs(),
            max_attempts: grid.max_attempts,
            threads: None,
        }
    }
}

impl Config {
    /// Reads the config file at the given path, falling back to defaults if
    /// there's no path.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(Path::new(path))
                    .with_context(|| format!("failed reading config file: {}", path))?;
                Self::from_toml(&text).with_context(|| format!("invalid config file: {}", path))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn network_config(&self) -> Result<NetworkConfig> {
        Ok(NetworkConfig {
            encoding: Encoding::from_str(&self.encoding)?,
            compress: self.compress,
            heartbeat_interval: duration(self.heartbeat),
            idle_timeout: duration(self.idle_timeout),
            poll_wait: Duration::from_millis(self.poll_wait),
            max_frame_size: self.max_frame_size,
            ..NetworkConfig::default()
        })
    }

    pub fn grid_config(&self) -> GridConfig {
        GridConfig {
            job_timeout: Duration::from_secs(self.grid.job_timeout),
            maintenance_interval: Duration::from_secs(self.grid.maintenance_interval),
            max_attempts: self.grid.max_attempts,
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(ripple_net::default_threads)
    }
}

fn millis(duration: Option<Duration>) -> u64 {
    duration.map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// 0 means disabled.
fn duration(millis: u64) -> Option<Duration> {
    match millis {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}
