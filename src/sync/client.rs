// Peer Client - How this node talks to other nodes
//
// The resolver only sees the PeerClient trait. HttpPeerClient speaks the
// node HTTP API; MockPeerClient serves chains from in-process ledgers for tests
// and local simulations.

use crate::ledger::{Block, Ledger};
use crate::sync::peer::PeerError;
use crate::sync::protocol::{ChainSnapshot, NodeRegistration};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// PEER CLIENT TRAIT
// ============================================================================

/// Operations this node performs against a remote peer
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetch the peer's full chain
    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError>;

    /// Offer a freshly sealed block to the peer
    async fn push_block(&self, peer: &str, block: &Block) -> Result<(), PeerError>;

    /// Ask the peer to register `own_address`; the peer answers with its chain
    async fn register_with(&self, peer: &str, own_address: &str) -> Result<ChainSnapshot, PeerError>;
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

/// PeerClient over the node HTTP API
#[derive(Clone, Debug)]
pub struct HttpPeerClient {
    http: reqwest::Client,
}

impl HttpPeerClient {
    /// Create a client whose every request is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Unreachable {
                peer: "<client>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { http })
    }

    fn url(peer: &str, path: &str) -> String {
        format!("{}/{}/", peer.trim_end_matches('/'), path)
    }

    fn map_error(peer: &str, err: reqwest::Error) -> PeerError {
        if err.is_timeout() {
            PeerError::Timeout(peer.to_string())
        } else if err.is_decode() {
            PeerError::Malformed {
                peer: peer.to_string(),
                reason: err.to_string(),
            }
        } else {
            PeerError::Unreachable {
                peer: peer.to_string(),
                reason: err.to_string(),
            }
        }
    }

    fn check_status(peer: &str, response: &reqwest::Response) -> Result<(), PeerError> {
        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError> {
        let response = self
            .http
            .get(Self::url(peer, "chain"))
            .send()
            .await
            .map_err(|e| Self::map_error(peer, e))?;
        Self::check_status(peer, &response)?;
        response
            .json::<ChainSnapshot>()
            .await
            .map_err(|e| Self::map_error(peer, e))
    }

    async fn push_block(&self, peer: &str, block: &Block) -> Result<(), PeerError> {
        let response = self
            .http
            .post(Self::url(peer, "add_block"))
            .json(block)
            .send()
            .await
            .map_err(|e| Self::map_error(peer, e))?;
        Self::check_status(peer, &response)
    }

    async fn register_with(&self, peer: &str, own_address: &str) -> Result<ChainSnapshot, PeerError> {
        let body = NodeRegistration {
            node_address: own_address.to_string(),
        };
        let response = self
            .http
            .post(Self::url(peer, "register_node"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::map_error(peer, e))?;
        Self::check_status(peer, &response)?;
        response
            .json::<ChainSnapshot>()
            .await
            .map_err(|e| Self::map_error(peer, e))
    }
}

// ============================================================================
// MOCK CLIENT
// ============================================================================

/// Behaviour of one simulated peer
#[derive(Clone)]
enum MockPeer {
    /// A live node backed by a real ledger
    Ledger(Arc<Ledger>),
    /// A node that always serves the same snapshot
    Snapshot(ChainSnapshot),
    /// A node that refuses connections
    Unreachable,
    /// A node that never answers
    Hanging,
}

/// In-process PeerClient for tests
#[derive(Default)]
pub struct MockPeerClient {
    peers: Mutex<HashMap<String, MockPeer>>,
    pushed: Mutex<Vec<(String, Block)>>,
    registrations: Mutex<Vec<(String, String)>>,
}

impl MockPeerClient {
    /// Create a mock with no peers (every address is unreachable)
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, peer: &str, behaviour: MockPeer) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.trim_end_matches('/').to_string(), behaviour);
    }

    fn get(&self, peer: &str) -> MockPeer {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer.trim_end_matches('/'))
            .cloned()
            .unwrap_or(MockPeer::Unreachable)
    }

    /// Serve `peer` from a live ledger
    pub fn with_ledger(self, peer: &str, ledger: Arc<Ledger>) -> Self {
        self.set(peer, MockPeer::Ledger(ledger));
        self
    }

    /// Serve a fixed snapshot for `peer`
    pub fn with_snapshot(self, peer: &str, snapshot: ChainSnapshot) -> Self {
        self.set(peer, MockPeer::Snapshot(snapshot));
        self
    }

    /// Make `peer` refuse connections
    pub fn with_unreachable(self, peer: &str) -> Self {
        self.set(peer, MockPeer::Unreachable);
        self
    }

    /// Make `peer` accept requests and never answer
    pub fn with_hanging(self, peer: &str) -> Self {
        self.set(peer, MockPeer::Hanging);
        self
    }

    /// Blocks pushed so far, with the peer they were pushed to
    pub fn pushed_blocks(&self) -> Vec<(String, Block)> {
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registrations received so far as (peer, registered address)
    pub fn registrations(&self) -> Vec<(String, String)> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn unreachable(peer: &str) -> PeerError {
        PeerError::Unreachable {
            peer: peer.to_string(),
            reason: "connection refused".to_string(),
        }
    }

    async fn hang(peer: &str) -> PeerError {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        PeerError::Timeout(peer.to_string())
    }

    fn snapshot_of(peer: &str, ledger: &Ledger) -> Result<ChainSnapshot, PeerError> {
        let chain = ledger.chain().map_err(|e| PeerError::Malformed {
            peer: peer.to_string(),
            reason: e.to_string(),
        })?;
        Ok(ChainSnapshot::new(chain, Vec::new()))
    }
}

#[async_trait]
impl PeerClient for MockPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError> {
        match self.get(peer) {
            MockPeer::Ledger(ledger) => Self::snapshot_of(peer, &ledger),
            MockPeer::Snapshot(snapshot) => Ok(snapshot),
            MockPeer::Unreachable => Err(Self::unreachable(peer)),
            MockPeer::Hanging => Err(Self::hang(peer).await),
        }
    }

    async fn push_block(&self, peer: &str, block: &Block) -> Result<(), PeerError> {
        let result = match self.get(peer) {
            MockPeer::Ledger(ledger) => match ledger.add_block(block.unsealed(), &block.block_hash) {
                Ok(admission) if admission.is_accepted() => Ok(()),
                _ => Err(PeerError::Status {
                    peer: peer.to_string(),
                    status: 400,
                }),
            },
            MockPeer::Snapshot(_) => Ok(()),
            MockPeer::Unreachable => Err(Self::unreachable(peer)),
            MockPeer::Hanging => Err(Self::hang(peer).await),
        };
        if result.is_ok() {
            self.pushed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((peer.to_string(), block.clone()));
        }
        result
    }

    async fn register_with(&self, peer: &str, own_address: &str) -> Result<ChainSnapshot, PeerError> {
        let snapshot = self.fetch_chain(peer).await?;
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((peer.to_string(), own_address.to_string()));
        Ok(snapshot)
    }
}
