// Sync module - HOW NODES TALK
// Peer registry, wire bodies, the peer client and longest-chain consensus

mod client;
mod consensus;
mod peer;
mod protocol;

pub use client::{HttpPeerClient, MockPeerClient, PeerClient};
pub use consensus::{AnnounceReport, ConsensusError, ConsensusPhase, ConsensusResolver, SyncOutcome};
pub use peer::{normalize_address, PeerError, PeerRegistry};
pub use protocol::{ChainSnapshot, NewTransaction, NodeRegistration};
