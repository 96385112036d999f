// Protocol - JSON bodies exchanged between nodes
//
// - ChainSnapshot: a node's full chain, served at /chain/ and /register_node/
// - NodeRegistration: asks a node to add (or contact) a peer
// - NewTransaction: a vote submitted by the front end
// Blocks themselves travel as the serde form of ledger::Block.

use crate::ledger::Block;
use crate::sync::peer::PeerError;
use serde::{Deserialize, Serialize};

/// A node's chain as served to peers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Length reported by the serving node
    pub length: usize,
    pub chain: Vec<Block>,
    #[serde(default)]
    pub peers: Vec<String>,
}

impl ChainSnapshot {
    /// Build a snapshot whose reported length matches the chain
    pub fn new(chain: Vec<Block>, peers: Vec<String>) -> Self {
        Self {
            length: chain.len(),
            chain,
            peers,
        }
    }

    /// Reject snapshots whose reported length disagrees with their content
    pub fn check_consistent(&self, peer: &str) -> Result<(), PeerError> {
        if self.length != self.chain.len() {
            return Err(PeerError::Malformed {
                peer: peer.to_string(),
                reason: format!(
                    "reported length {} but sent {} blocks",
                    self.length,
                    self.chain.len()
                ),
            });
        }
        Ok(())
    }
}

/// Body of /register_node/ and /register_with/
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_address: String,
}

/// Body of /new_transaction/
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    #[serde(default)]
    pub candidate: String,
    #[serde(rename = "voterhash", default)]
    pub voter_hash: String,
}
