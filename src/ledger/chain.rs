// Ledger - The vote chain and everything that mutates it
//
// Chain, pending pool and the already-voted index sit behind one mutex so
// admission, mining and chain replacement never interleave. Proof-of-work runs
// with the lock released; admission re-checks the parent afterwards.

use crate::ledger::block::{timestamp_now, Block, Transaction, ValidationError};
use crate::ledger::pool::{PoolError, TransactionPool};
use crate::ledger::work::{proof_of_work_cancellable, CancelToken};
use crate::storage::{ChainStore, MemoryChainStore, StoreError};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How many times one transaction is re-mined after the tip moved under it
const MAX_STALE_RETRIES: usize = 3;

/// Errors from ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Chain is empty: genesis block was never created")]
    ChainEmpty,

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("Mining was cancelled")]
    MiningCancelled,

    #[error("Candidate chain failed validation")]
    InvalidChain,
}

/// Why a block was refused
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Block does not extend the current tip
    StaleParent { expected: String, found: String },
    /// Proof is missing the difficulty prefix or does not match the content
    InvalidProof,
    /// Block is structurally wrong
    Malformed(ValidationError),
    /// Block carries a vote that is already committed
    DuplicateVote(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleParent { expected, found } => {
                write!(f, "previous hash {} does not match tip {}", found, expected)
            }
            Self::InvalidProof => write!(f, "invalid proof of work"),
            Self::Malformed(e) => write!(f, "malformed block: {}", e),
            Self::DuplicateVote(voter) => write!(f, "voter {} already voted", voter),
        }
    }
}

/// Outcome of offering a block to the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted { index: u64 },
    Rejected(RejectReason),
}

impl Admission {
    /// Check if the block was appended
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Outcome of a mining request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MineOutcome {
    /// `blocks` were sealed and appended by this run, in order; `index` is
    /// the tip afterwards. A cancelled run that already appended blocks
    /// reports them here.
    Mined { index: u64, blocks: Vec<Block> },
    /// The pool was empty
    NothingPending,
    /// Another mining run holds the guard
    AlreadyMining,
}

/// Length comparison used when deciding to adopt another chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthPolicy {
    /// Candidate must be strictly longer
    Longer,
    /// Candidate may be as long as the local chain
    AtLeastAsLong,
}

impl MineOutcome {
    /// Blocks appended by the run, empty unless `Mined`
    pub fn mined_blocks(&self) -> &[Block] {
        match self {
            Self::Mined { blocks, .. } => blocks,
            _ => &[],
        }
    }
}

impl LengthPolicy {
    /// Whether a candidate of `candidate` blocks beats `local` blocks
    pub fn admits(self, candidate: usize, local: usize) -> bool {
        match self {
            Self::Longer => candidate > local,
            Self::AtLeastAsLong => candidate >= local,
        }
    }
}

/// Clears the mining flag when a run ends, however it ends
struct MiningGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> MiningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for MiningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// LEDGER STATE
// ============================================================================

struct LedgerState {
    store: Box<dyn ChainStore>,
    pending: TransactionPool,
    already_voted: HashSet<String>,
}

impl LedgerState {
    fn last_block(&self) -> Result<Block, LedgerError> {
        self.store.latest_block()?.ok_or(LedgerError::ChainEmpty)
    }

    fn admit(&mut self, mut block: Block, proof: &str) -> Result<Admission, LedgerError> {
        let last = self.last_block()?;

        if block.previous_hash != last.block_hash {
            return Ok(Admission::Rejected(RejectReason::StaleParent {
                expected: last.block_hash,
                found: block.previous_hash,
            }));
        }

        if !Block::meets_difficulty(proof) || proof != block.compute_hash() {
            return Ok(Admission::Rejected(RejectReason::InvalidProof));
        }

        if let Err(e) = check_shape(&block, &last) {
            return Ok(Admission::Rejected(RejectReason::Malformed(e)));
        }

        if let Some(voter) = block.voter_hashes().find(|v| self.already_voted.contains(*v)) {
            return Ok(Admission::Rejected(RejectReason::DuplicateVote(voter.to_string())));
        }

        block.block_hash = proof.to_string();
        let index = block.index;
        let voters: Vec<String> = block.voter_hashes().map(str::to_string).collect();
        self.store.append_block(block)?;

        for voter in voters {
            self.pending.remove_voter(&voter);
            self.already_voted.insert(voter);
        }

        info!(index, hash = %proof, "block appended");
        Ok(Admission::Accepted { index })
    }

    fn install(&mut self, chain: Vec<Block>) -> Result<(), LedgerError> {
        let already_voted = voters_of(&chain);
        self.store.replace_chain(chain)?;
        self.already_voted = already_voted;
        let purged = self.pending.purge_committed(&self.already_voted);
        if purged > 0 {
            debug!(purged, "dropped pending votes committed by the new chain");
        }
        Ok(())
    }
}

fn check_shape(block: &Block, last: &Block) -> Result<(), ValidationError> {
    if block.index != last.index + 1 {
        return Err(ValidationError::IndexGap {
            previous: last.index,
            actual: block.index,
        });
    }
    if block.transactions.is_empty() {
        return Err(ValidationError::EmptyBlock(block.index));
    }

    let mut seen = HashSet::new();
    for tx in &block.transactions {
        tx.validate()?;
        if !seen.insert(tx.voter_hash.as_str()) {
            return Err(ValidationError::RepeatedVoter(tx.voter_hash.clone()));
        }
    }
    Ok(())
}

fn voters_of(chain: &[Block]) -> HashSet<String> {
    chain
        .iter()
        .flat_map(|b| b.voter_hashes())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// LEDGER
// ============================================================================

/// A node's chain of vote blocks plus its pending pool
pub struct Ledger {
    state: Mutex<LedgerState>,
    mining: AtomicBool,
}

impl Ledger {
    /// Create a ledger over an existing store, rebuilding the voted index
    pub fn new(store: Box<dyn ChainStore>) -> Result<Self, LedgerError> {
        let chain = store.load_chain()?;
        let already_voted = voters_of(&chain);

        Ok(Self {
            state: Mutex::new(LedgerState {
                store,
                pending: TransactionPool::new(),
                already_voted,
            }),
            mining: AtomicBool::new(false),
        })
    }

    /// Create a ledger held entirely in memory
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                store: Box::new(MemoryChainStore::new()),
                pending: TransactionPool::new(),
                already_voted: HashSet::new(),
            }),
            mining: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append the genesis block if the chain is empty.
    /// Returns whether a block was created.
    pub fn create_genesis(&self) -> Result<bool, LedgerError> {
        let mut state = self.state();
        if !state.store.is_empty()? {
            return Ok(false);
        }
        let genesis = Block::genesis();
        info!(hash = %genesis.block_hash, "genesis block created");
        state.store.append_block(genesis)?;
        Ok(true)
    }

    /// The block at the tip
    pub fn last_block(&self) -> Result<Block, LedgerError> {
        self.state().last_block()
    }

    /// Number of blocks in the chain
    pub fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.state().store.len()?)
    }

    /// Check if the chain has no blocks
    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.state().store.is_empty()?)
    }

    /// Copy of the full chain, genesis first
    pub fn chain(&self) -> Result<Vec<Block>, LedgerError> {
        Ok(self.state().store.load_chain()?)
    }

    /// Copy of the pending transactions in submission order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state().pending.peek_all().cloned().collect()
    }

    /// Number of pending transactions
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Copy of the set of committed voter hashes
    pub fn already_voted(&self) -> HashSet<String> {
        self.state().already_voted.clone()
    }

    /// Check whether a voter has a committed vote
    pub fn has_voted(&self, voter_hash: &str) -> bool {
        self.state().already_voted.contains(voter_hash)
    }

    /// Check whether a mining run is in progress
    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::Acquire)
    }

    /// Queue a vote for mining
    pub fn submit_transaction(
        &self,
        candidate: &str,
        voter_hash: &str,
    ) -> Result<Transaction, LedgerError> {
        let tx = Transaction::new(candidate, voter_hash)?;
        let mut state = self.state();
        let state = &mut *state;
        state.pending.submit(tx.clone(), &state.already_voted)?;
        debug!(voter = %tx.voter_hash, pending = state.pending.len(), "vote queued");
        Ok(tx)
    }

    /// Offer a block with its proof. Rejections are returned, not raised;
    /// only an empty chain or a storage failure is an error.
    pub fn add_block(&self, block: Block, proof: &str) -> Result<Admission, LedgerError> {
        let admission = self.state().admit(block, proof)?;
        if let Admission::Rejected(reason) = &admission {
            warn!(%reason, "block rejected");
        }
        Ok(admission)
    }

    /// Mine every transaction pending at the start of the run, one block per
    /// transaction.
    pub fn mine(&self, cancel: &CancelToken) -> Result<MineOutcome, LedgerError> {
        if self.state().pending.is_empty() {
            return Ok(MineOutcome::NothingPending);
        }
        let Some(_guard) = MiningGuard::acquire(&self.mining) else {
            return Ok(MineOutcome::AlreadyMining);
        };

        let voters: Vec<String> = self
            .state()
            .pending
            .peek_all()
            .map(|tx| tx.voter_hash.clone())
            .collect();
        let mut mined = Vec::new();

        'voters: for voter in voters {
            for attempt in 0..=MAX_STALE_RETRIES {
                let mut block = {
                    let state = self.state();
                    // Gone if a replacement chain committed it meanwhile
                    let Some(tx) = state.pending.peek_all().find(|tx| tx.voter_hash == voter) else {
                        continue 'voters;
                    };
                    let parent = state.last_block()?;
                    Block::new(parent.index + 1, vec![tx.clone()], &timestamp_now(), &parent.block_hash)
                };

                let Some(proof) = proof_of_work_cancellable(&mut block, cancel) else {
                    warn!(mined = mined.len(), "mining cancelled");
                    if mined.is_empty() {
                        return Err(LedgerError::MiningCancelled);
                    }
                    break 'voters;
                };

                let mut sealed = block.clone();
                sealed.block_hash = proof.clone();
                match self.add_block(block, &proof)? {
                    Admission::Accepted { .. } => {
                        mined.push(sealed);
                        continue 'voters;
                    }
                    Admission::Rejected(RejectReason::StaleParent { .. }) => {
                        debug!(voter = %voter, attempt, "tip moved during proof-of-work");
                    }
                    Admission::Rejected(_) => break 'voters,
                }
            }
            warn!(voter = %voter, "giving up on vote after repeated stale tips");
            break;
        }

        let index = self.last_block()?.index;
        Ok(MineOutcome::Mined { index, blocks: mined })
    }

    /// Verify hashes, proofs and links of a chain without touching it.
    /// Indices must run 0, 1, 2, ... and no voter may be committed twice.
    /// The genesis block only seeds the expected previous hash.
    pub fn check_chain_validity(chain: &[Block]) -> bool {
        let Some((genesis, rest)) = chain.split_first() else {
            return false;
        };
        if genesis.index != 0 {
            debug!(index = genesis.index, "chain does not start at index 0");
            return false;
        }

        let mut voters: HashSet<&str> = genesis.voter_hashes().collect();
        let mut previous = genesis;
        for block in rest {
            if block.index != previous.index + 1 {
                debug!(index = block.index, previous = previous.index, "chain index out of sequence");
                return false;
            }
            if block.previous_hash != previous.block_hash
                || !Block::meets_difficulty(&block.block_hash)
                || block.compute_hash() != block.block_hash
            {
                debug!(index = block.index, "chain validity check failed");
                return false;
            }
            if let Some(voter) = block.voter_hashes().find(|v| !voters.insert(*v)) {
                debug!(index = block.index, voter = %voter, "voter committed twice");
                return false;
            }
            previous = block;
        }
        true
    }

    /// Validate this ledger's own chain
    pub fn check_validity(&self) -> Result<bool, LedgerError> {
        Ok(Self::check_chain_validity(&self.chain()?))
    }

    /// Adopt `candidate` if it is valid and still beats the local chain
    /// under `policy`. The length check and the swap happen under the same
    /// lock.
    pub fn replace_chain_if(
        &self,
        candidate: Vec<Block>,
        policy: LengthPolicy,
    ) -> Result<bool, LedgerError> {
        if !Self::check_chain_validity(&candidate) {
            return Err(LedgerError::InvalidChain);
        }
        let mut state = self.state();
        let local = state.store.len()?;
        if !policy.admits(candidate.len(), local) {
            return Ok(false);
        }
        let length = candidate.len();
        state.install(candidate)?;
        info!(length, previous = local, "chain replaced");
        Ok(true)
    }

    /// Validate and adopt `candidate` regardless of length
    pub fn force_replace_chain(&self, candidate: Vec<Block>) -> Result<(), LedgerError> {
        if !Self::check_chain_validity(&candidate) {
            return Err(LedgerError::InvalidChain);
        }
        let length = candidate.len();
        self.state().install(candidate)?;
        info!(length, "chain loaded from peer");
        Ok(())
    }
}
