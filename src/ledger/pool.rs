// Transaction Pool - Votes waiting to be mined
//
// FIFO queue deduplicated by voter hash. Lookups are a linear scan over the
// queue; pools stay small (one entry per voter between mining rounds), so
// submission is O(n) in the pool size.

use crate::ledger::block::Transaction;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Where a conflicting vote was found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteLocation {
    /// Already queued in the pool
    Pending,
    /// Already committed to the chain
    Committed,
}

impl fmt::Display for VoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Committed => write!(f, "committed"),
        }
    }
}

/// Errors from pool operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Duplicate vote from {voter_hash}: already {location}")]
    DuplicateVote {
        voter_hash: String,
        location: VoteLocation,
    },
}

/// Queue of transactions not yet committed to the chain
#[derive(Clone, Debug, Default)]
pub struct TransactionPool {
    queue: VecDeque<Transaction>,
}

impl TransactionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check whether a voter already has a pending transaction
    pub fn contains_voter(&self, voter_hash: &str) -> bool {
        self.queue.iter().any(|tx| tx.voter_hash == voter_hash)
    }

    /// Queue a transaction unless the voter is already pending or committed
    pub fn submit(
        &mut self,
        transaction: Transaction,
        already_voted: &HashSet<String>,
    ) -> Result<(), PoolError> {
        let location = if already_voted.contains(&transaction.voter_hash) {
            Some(VoteLocation::Committed)
        } else if self.contains_voter(&transaction.voter_hash) {
            Some(VoteLocation::Pending)
        } else {
            None
        };

        if let Some(location) = location {
            return Err(PoolError::DuplicateVote {
                voter_hash: transaction.voter_hash,
                location,
            });
        }

        self.queue.push_back(transaction);
        Ok(())
    }

    /// Oldest pending transaction
    pub fn front(&self) -> Option<&Transaction> {
        self.queue.front()
    }

    /// All pending transactions in submission order
    pub fn peek_all(&self) -> impl Iterator<Item = &Transaction> {
        self.queue.iter()
    }

    /// Remove and return up to `n` transactions from the front. Mining does
    /// not use this; it reads `peek_all` and removes each vote with
    /// `remove_voter` once its block is admitted.
    pub fn drain(&mut self, n: usize) -> Vec<Transaction> {
        let n = n.min(self.queue.len());
        self.queue.drain(..n).collect()
    }

    /// Remove the pending transaction for a voter, if any
    pub fn remove_voter(&mut self, voter_hash: &str) -> Option<Transaction> {
        let pos = self.queue.iter().position(|tx| tx.voter_hash == voter_hash)?;
        self.queue.remove(pos)
    }

    /// Drop every pending transaction whose voter is already committed.
    /// Returns how many were dropped.
    pub fn purge_committed(&mut self, already_voted: &HashSet<String>) -> usize {
        let before = self.queue.len();
        self.queue.retain(|tx| !already_voted.contains(&tx.voter_hash));
        before - self.queue.len()
    }
}
