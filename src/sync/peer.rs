// Peer Management - Track known peer nodes
//
// Peers are identified by their base URL. Addresses are normalized on the way
// in so "http://a:8000/" and "http://a:8000" are the same peer.

use std::collections::BTreeSet;
use thiserror::Error;

/// Peer-related errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Invalid peer address: {0:?}")]
    InvalidAddress(String),

    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {0} timed out")]
    Timeout(String),

    #[error("Peer {peer} answered with status {status}")]
    Status { peer: String, status: u16 },

    #[error("Malformed response from {peer}: {reason}")]
    Malformed { peer: String, reason: String },
}

/// Strip whitespace and trailing path separators from a peer address
pub fn normalize_address(address: &str) -> Result<String, PeerError> {
    let normalized = address.trim().trim_end_matches('/');
    if normalized.is_empty() {
        return Err(PeerError::InvalidAddress(address.to_string()));
    }
    Ok(normalized.to_string())
}

/// Registry of known peers
#[derive(Clone, Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeSet<String>,
}

impl PeerRegistry {
    /// Create a new peer registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Get number of peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check if we have a peer
    pub fn contains(&self, address: &str) -> bool {
        normalize_address(address)
            .map(|a| self.peers.contains(&a))
            .unwrap_or(false)
    }

    /// Add a peer. Returns the normalized address; adding twice is a no-op.
    pub fn add_peer(&mut self, address: &str) -> Result<String, PeerError> {
        let normalized = normalize_address(address)?;
        self.peers.insert(normalized.clone());
        Ok(normalized)
    }

    /// Remove a peer
    pub fn remove_peer(&mut self, address: &str) -> bool {
        match normalize_address(address) {
            Ok(a) => self.peers.remove(&a),
            Err(_) => false,
        }
    }

    /// All peer addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }
}
