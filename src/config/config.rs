use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::util::errors::{RaftError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Minimum election timeout in milliseconds (e.g., 150)
    pub election_timeout_min_ms: u64,

    /// Maximum election timeout in milliseconds, exclusive (e.g., 300)
    pub election_timeout_max_ms: u64,

    /// Heartbeat interval in milliseconds (e.g., 50)
    /// Should be much less than election timeout
    pub heartbeat_interval_ms: u64,

    /// Upper bound on a single RPC round trip
    pub rpc_timeout_ms: u64,

    /// Draw a fresh election timeout every time the timer is armed.
    /// When false the timeout is drawn once per node and reused.
    pub randomize_election_timeout: bool,
}

impl RaftConfig {
    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Uniform draw from `[min, max)`
    pub fn draw_election_timeout(&self) -> Duration {
        let timeout_ms = rand::thread_rng()
            .gen_range(self.election_timeout_min_ms..self.election_timeout_max_ms);
        Duration::from_millis(timeout_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err("election_timeout_min must be less than election_timeout_max".to_string());
        }

        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval cannot be zero".to_string());
        }

        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err("heartbeat_interval must be less than election_timeout_min".to_string());
        }

        if self.rpc_timeout_ms == 0 {
            return Err("rpc_timeout cannot be zero".to_string());
        }

        Ok(())
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            rpc_timeout_ms: 500,
            randomize_election_timeout: true,
        }
    }
}

/// A cluster member as resolved from the service registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's index into `peers`
    #[serde(default)]
    pub me: usize,
    pub peers: Vec<PeerConfig>,
}

impl ClusterConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.peers.is_empty() {
            return Err("No peers configured".to_string());
        }

        if self.me >= self.peers.len() {
            return Err(format!(
                "me ({}) is out of range for {} peers",
                self.me,
                self.peers.len()
            ));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if !seen.insert(peer.instance_id.as_str()) {
                return Err(format!("Duplicate instance id: {}", peer.instance_id));
            }
        }

        Ok(())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let peers = (8544..=8546)
            .map(|port| PeerConfig {
                host: "localhost".to_string(),
                port,
                secure: true,
                instance_id: format!("localhost:zlux:{}", port),
            })
            .collect();

        Self { me: 0, peers }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub raft: RaftConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Default tracing filter, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raft: RaftConfig::default(),
            cluster: ClusterConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.raft.validate().map_err(RaftError::InvalidConfig)?;
        self.cluster.validate().map_err(RaftError::InvalidConfig)?;
        Ok(())
    }
}
