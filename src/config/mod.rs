pub mod config;

pub use config::{ClusterConfig, Config, PeerConfig, RaftConfig};
