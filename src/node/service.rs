// Vote Node - One participant in the voting network
//
// Owns the ledger, the peer registry and the consensus resolver, and exposes
// the operations the HTTP API serves. Proof-of-work runs on the blocking pool;
// a run is cancelled by node shutdown or by the configured mining timeout.

use crate::ledger::{Admission, Block, CancelToken, Ledger, LedgerError, MineOutcome, Transaction};
use crate::node::config::{ConfigError, NodeConfig};
use crate::storage::{ChainStore, MemoryChainStore, SledChainStore, StoreError};
use crate::sync::{
    normalize_address, AnnounceReport, ChainSnapshot, ConsensusError, ConsensusResolver,
    PeerClient, PeerError, PeerRegistry, SyncOutcome,
};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Errors surfaced by node operations
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Node is shutting down")]
    ShuttingDown,

    #[error("Mining task failed: {0}")]
    Task(String),
}

/// Result of checking the local chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Tampered,
}

/// A running vote node
pub struct VoteNode {
    config: NodeConfig,
    ledger: Arc<Ledger>,
    peers: RwLock<PeerRegistry>,
    resolver: ConsensusResolver,
    shutdown: watch::Sender<bool>,
}

impl VoteNode {
    /// Open the configured store, create genesis if needed and register
    /// bootstrap peers
    pub fn new(config: NodeConfig, client: Arc<dyn PeerClient>) -> Result<Self, NodeError> {
        let store: Box<dyn ChainStore> = match &config.data_dir {
            Some(dir) => {
                info!(path = %dir.display(), "opening chain store");
                Box::new(SledChainStore::open(dir)?)
            }
            None => Box::new(MemoryChainStore::new()),
        };
        let ledger = Ledger::new(store)?;
        ledger.create_genesis()?;
        Ok(Self::with_ledger(config, Arc::new(ledger), client))
    }

    /// Build a node around an existing ledger
    pub fn with_ledger(config: NodeConfig, ledger: Arc<Ledger>, client: Arc<dyn PeerClient>) -> Self {
        let mut registry = PeerRegistry::new();
        for peer in &config.bootstrap_peers {
            if let Err(e) = registry.add_peer(peer) {
                warn!(error = %e, "ignoring bootstrap peer");
            }
        }
        let resolver = ConsensusResolver::new(client, config.peer_timeout());
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            ledger,
            peers: RwLock::new(registry),
            resolver,
            shutdown,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn resolver(&self) -> &ConsensusResolver {
        &self.resolver
    }

    /// Known peer addresses, sorted
    pub fn peers(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .addresses()
    }

    // ========================================================================
    // VOTES AND BLOCKS
    // ========================================================================

    /// Queue a vote for the next mining run
    pub fn submit_transaction(&self, candidate: &str, voter_hash: &str) -> Result<Transaction, NodeError> {
        Ok(self.ledger.submit_transaction(candidate, voter_hash)?)
    }

    /// Pending votes in submission order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.ledger.pending_transactions()
    }

    /// The full chain with its length and our peers
    pub fn get_chain(&self) -> Result<ChainSnapshot, NodeError> {
        Ok(ChainSnapshot::new(self.ledger.chain()?, self.peers()))
    }

    /// Offer a sealed block received from a peer. The block's own
    /// `blockhash` is the proof.
    pub fn add_block(&self, block: Block) -> Result<Admission, NodeError> {
        let proof = block.block_hash.clone();
        Ok(self.ledger.add_block(block.unsealed(), &proof)?)
    }

    pub fn check_validity(&self) -> Result<Validity, NodeError> {
        if self.ledger.check_validity()? {
            Ok(Validity::Valid)
        } else {
            warn!("local chain failed validation");
            Ok(Validity::Tampered)
        }
    }

    /// Mine all pending votes, then reconcile with peers and announce the
    /// new blocks if our chain survived.
    pub async fn mine(&self) -> Result<MineOutcome, NodeError> {
        let mut stop = self.shutdown.subscribe();
        if *stop.borrow() {
            return Err(NodeError::ShuttingDown);
        }

        let cancel = CancelToken::new();
        // Stops the proof-of-work if this future is dropped mid-run
        let _abandon = cancel.drop_guard();
        let run = cancel.clone();
        let ledger = Arc::clone(&self.ledger);
        let mut task = tokio::task::spawn_blocking(move || ledger.mine(&run));

        let limit = self.config.mining_timeout();
        let deadline = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let stopped = async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        };

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = deadline => {
                warn!("mining timed out, cancelling");
                cancel.cancel();
                task.await
            }
            _ = stopped => {
                cancel.cancel();
                task.await
            }
        };
        let outcome = joined.map_err(|e| NodeError::Task(e.to_string()))??;

        if let MineOutcome::Mined { index, blocks } = &outcome {
            info!(index, blocks = blocks.len(), "mining run finished");
            if !blocks.is_empty() {
                self.after_mine(blocks).await?;
            }
        }
        Ok(outcome)
    }

    async fn after_mine(&self, blocks: &[Block]) -> Result<(), NodeError> {
        let peers = self.peers();
        if peers.is_empty() {
            return Ok(());
        }

        let outcome = self.resolver.reconcile_after_mine(&self.ledger, peers.clone()).await?;
        if outcome.is_replaced() {
            info!(length = outcome.length(), "mined blocks superseded by a longer peer chain");
            return Ok(());
        }

        let mut total = AnnounceReport::default();
        for block in blocks {
            let report = self.resolver.announce_block(block, peers.clone()).await;
            total.delivered += report.delivered;
            total.failed += report.failed;
        }
        info!(delivered = total.delivered, failed = total.failed, "announced mined blocks");
        Ok(())
    }

    // ========================================================================
    // PEERS
    // ========================================================================

    /// Add a peer that contacted us and hand it our chain
    pub fn register_peer(&self, address: &str) -> Result<ChainSnapshot, NodeError> {
        let address = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_peer(address)?;
        info!(peer = %address, "peer registered");
        self.get_chain()
    }

    /// Register with a remote node, adopt its chain and add it as a peer.
    /// Returns the new chain length.
    pub async fn register_with(&self, address: &str) -> Result<usize, NodeError> {
        let remote = normalize_address(address)?;
        let own = self.config.advertised_url();
        let length = self.resolver.register_with(&self.ledger, &remote, &own).await?;
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_peer(&remote)?;
        Ok(length)
    }

    /// Adopt any valid peer chain at least as long as ours
    pub async fn sync_with_peers(&self) -> Result<SyncOutcome, NodeError> {
        Ok(self.resolver.sync_with_peers(&self.ledger, self.peers()).await?)
    }

    /// Cancel any mining run and refuse new ones
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("node shutting down");
        }
    }

    /// Check if shutdown was requested
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
