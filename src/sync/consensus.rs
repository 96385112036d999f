// Consensus - Longest valid chain wins
//
// Every peer is asked for its chain concurrently, each request under its own
// timeout. Peers that fail, time out, lie about their length or serve an
// invalid chain are skipped. The longest surviving chain replaces ours if it
// passes the caller's length policy.

use crate::ledger::{Block, Ledger, LedgerError, LengthPolicy};
use crate::sync::client::PeerClient;
use crate::sync::peer::PeerError;
use crate::sync::protocol::ChainSnapshot;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Consensus errors
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("No peers registered")]
    NoPeers,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

/// Where the resolver is in a reconciliation round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusPhase {
    Idle,
    Fetching,
    Validating,
    Replacing,
    Unchanged,
}

/// Result of a reconciliation round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local chain was replaced; `length` is the new length
    Replaced { length: usize },
    /// No qualifying chain; local chain of `length` kept
    Unchanged { length: usize },
}

impl SyncOutcome {
    /// Chain length after the round
    pub fn length(&self) -> usize {
        match self {
            Self::Replaced { length } | Self::Unchanged { length } => *length,
        }
    }

    /// Check if the local chain was replaced
    pub fn is_replaced(&self) -> bool {
        matches!(self, Self::Replaced { .. })
    }
}

/// Delivery summary of a block announcement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnounceReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Returns the resolver to Idle however a round ends
struct PhaseReset<'a>(&'a ConsensusResolver);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        self.0.set_phase(ConsensusPhase::Idle);
    }
}

/// Reconciles the local ledger against peers
pub struct ConsensusResolver {
    client: Arc<dyn PeerClient>,
    peer_timeout: Duration,
    phase: Mutex<ConsensusPhase>,
}

impl ConsensusResolver {
    /// Create a resolver; every peer request is bounded by `peer_timeout`
    pub fn new(client: Arc<dyn PeerClient>, peer_timeout: Duration) -> Self {
        Self {
            client,
            peer_timeout,
            phase: Mutex::new(ConsensusPhase::Idle),
        }
    }

    /// Current phase of the reconciliation state machine
    pub fn phase(&self) -> ConsensusPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: ConsensusPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
        debug!(?phase, "consensus phase");
    }

    /// After mining: adopt a peer chain only if strictly longer than ours
    pub async fn reconcile_after_mine(
        &self,
        ledger: &Ledger,
        peers: Vec<String>,
    ) -> Result<SyncOutcome, ConsensusError> {
        self.resolve(ledger, peers, LengthPolicy::Longer).await
    }

    /// On request: adopt a peer chain at least as long as ours
    pub async fn sync_with_peers(
        &self,
        ledger: &Ledger,
        peers: Vec<String>,
    ) -> Result<SyncOutcome, ConsensusError> {
        self.resolve(ledger, peers, LengthPolicy::AtLeastAsLong).await
    }

    async fn resolve(
        &self,
        ledger: &Ledger,
        peers: Vec<String>,
        policy: LengthPolicy,
    ) -> Result<SyncOutcome, ConsensusError> {
        if peers.is_empty() {
            return Err(ConsensusError::NoPeers);
        }
        let _reset = PhaseReset(self);

        self.set_phase(ConsensusPhase::Fetching);
        let snapshots = self.fetch_all(peers).await;

        self.set_phase(ConsensusPhase::Validating);
        let local = ledger.len()?;
        let Some((peer, chain)) = select_best(snapshots, local, policy) else {
            self.set_phase(ConsensusPhase::Unchanged);
            info!(length = local, "no better chain among peers");
            return Ok(SyncOutcome::Unchanged { length: local });
        };

        self.set_phase(ConsensusPhase::Replacing);
        let length = chain.len();
        if ledger.replace_chain_if(chain, policy)? {
            info!(peer = %peer, length, "adopted peer chain");
            Ok(SyncOutcome::Replaced { length })
        } else {
            // Local chain grew while we were fetching
            Ok(SyncOutcome::Unchanged { length: ledger.len()? })
        }
    }

    async fn fetch_all(&self, peers: Vec<String>) -> Vec<(String, ChainSnapshot)> {
        let mut tasks = JoinSet::new();
        for peer in peers {
            let client = Arc::clone(&self.client);
            let limit = self.peer_timeout;
            tasks.spawn(async move {
                let result = timeout(limit, client.fetch_chain(&peer))
                    .await
                    .unwrap_or_else(|_| Err(PeerError::Timeout(peer.clone())));
                (peer, result)
            });
        }

        let mut snapshots = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(snapshot))) => snapshots.push((peer, snapshot)),
                Ok((peer, Err(e))) => warn!(peer = %peer, error = %e, "skipping peer"),
                Err(e) => warn!(error = %e, "peer fetch task failed"),
            }
        }
        // Completion order is arbitrary; ties must not depend on it
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Push a sealed block to every peer. Failures are logged and counted.
    pub async fn announce_block(&self, block: &Block, peers: Vec<String>) -> AnnounceReport {
        let mut tasks = JoinSet::new();
        for peer in peers {
            let client = Arc::clone(&self.client);
            let block = block.clone();
            let limit = self.peer_timeout;
            tasks.spawn(async move {
                let result = timeout(limit, client.push_block(&peer, &block))
                    .await
                    .unwrap_or_else(|_| Err(PeerError::Timeout(peer.clone())));
                (peer, result)
            });
        }

        let mut report = AnnounceReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    debug!(peer = %peer, index = block.index, "block announced");
                    report.delivered += 1;
                }
                Ok((peer, Err(e))) => {
                    warn!(peer = %peer, error = %e, "block announcement failed");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "announce task failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Register with `remote` and load its chain in place of ours.
    /// Returns the new chain length.
    pub async fn register_with(
        &self,
        ledger: &Ledger,
        remote: &str,
        own_address: &str,
    ) -> Result<usize, ConsensusError> {
        let snapshot = timeout(self.peer_timeout, self.client.register_with(remote, own_address))
            .await
            .unwrap_or_else(|_| Err(PeerError::Timeout(remote.to_string())))?;
        snapshot.check_consistent(remote)?;

        let length = snapshot.chain.len();
        ledger.force_replace_chain(snapshot.chain)?;
        info!(peer = %remote, length, "registered with peer");
        Ok(length)
    }
}

/// Pick the longest consistent, valid snapshot that beats `local` under `policy`
fn select_best(
    snapshots: Vec<(String, ChainSnapshot)>,
    local: usize,
    policy: LengthPolicy,
) -> Option<(String, Vec<Block>)> {
    let mut best_len = local;
    let mut best = None;

    for (peer, snapshot) in snapshots {
        if let Err(e) = snapshot.check_consistent(&peer) {
            warn!(error = %e, "skipping peer");
            continue;
        }
        if !policy.admits(snapshot.length, best_len) {
            debug!(peer = %peer, length = snapshot.length, "peer chain not long enough");
            continue;
        }
        if !Ledger::check_chain_validity(&snapshot.chain) {
            warn!(peer = %peer, length = snapshot.length, "peer served an invalid chain");
            continue;
        }
        best_len = snapshot.length;
        best = Some((peer, snapshot.chain));
    }
    best
}
