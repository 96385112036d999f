// Node Configuration - Where a vote node listens, stores and reaches peers
//
// Defaults come from `NodeConfig::default()`, a TOML file may override them,
// and the binary applies CLI flags last through the `with_*` builders.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid config: {0}")]
    Parse(String),
}

/// Configuration for a vote node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Socket address the HTTP API binds to
    pub listen_addr: String,
    /// Base URL other nodes use to reach this one
    pub public_url: Option<String>,
    /// Directory for the sled chain store; in-memory when unset
    pub data_dir: Option<PathBuf>,
    /// Bound on every request to a peer, in seconds
    pub peer_timeout_secs: u64,
    /// Abort a mining run after this many seconds
    pub mining_timeout_secs: Option<u64>,
    /// Peers registered at startup
    pub bootstrap_peers: Vec<String>,
    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
    /// Emit newline-delimited JSON logs
    pub json_logs: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            public_url: None,
            data_dir: None,
            peer_timeout_secs: 5,
            mining_timeout_secs: None,
            bootstrap_peers: Vec::new(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl NodeConfig {
    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_peer_timeout(mut self, secs: u64) -> Self {
        self.peer_timeout_secs = secs;
        self
    }

    pub fn with_mining_timeout(mut self, secs: u64) -> Self {
        self.mining_timeout_secs = Some(secs);
        self
    }

    pub fn with_bootstrap_peer(mut self, peer: impl Into<String>) -> Self {
        self.bootstrap_peers.push(peer.into());
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Peer request timeout as a Duration
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs.max(1))
    }

    /// Mining timeout as a Duration, if configured
    pub fn mining_timeout(&self) -> Option<Duration> {
        self.mining_timeout_secs.map(Duration::from_secs)
    }

    /// URL this node announces to peers; falls back to the listen address
    pub fn advertised_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.listen_addr),
        }
    }
}
