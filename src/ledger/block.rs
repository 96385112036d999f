// Block - Sealed vote records and the transactions they carry
//
// Field names on the wire are shared with every other node in the network,
// so the serde renames below must never change.

use crate::ledger::hashing::HashTemplate;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Required number of leading zero hex characters in a sealed block hash
pub const DIFFICULTY: usize = 4;

/// Placeholder stored in `block_hash` until the block is sealed, and in
/// `previous_hash` of the genesis block
pub const UNSEALED_HASH: &str = "0";

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Errors for structurally malformed transactions or blocks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Block #{0} carries no transactions")]
    EmptyBlock(u64),

    #[error("Block index {actual} does not follow {previous}")]
    IndexGap { previous: u64, actual: u64 },

    #[error("Voter {0} appears more than once in the block")]
    RepeatedVoter(String),
}

/// Current time in the textual form stored on transactions and blocks
pub fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// A single vote cast for a candidate
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub candidate: String,
    #[serde(rename = "voterhash")]
    pub voter_hash: String,
    #[serde(default)]
    pub timestamp: String,
}

impl Transaction {
    /// Create a transaction stamped with the current time
    pub fn new(candidate: &str, voter_hash: &str) -> Result<Self, ValidationError> {
        Self::with_timestamp(candidate, voter_hash, &timestamp_now())
    }

    /// Create a transaction with an explicit timestamp
    pub fn with_timestamp(
        candidate: &str,
        voter_hash: &str,
        timestamp: &str,
    ) -> Result<Self, ValidationError> {
        let tx = Self {
            candidate: candidate.trim().to_string(),
            voter_hash: voter_hash.trim().to_string(),
            timestamp: timestamp.to_string(),
        };
        tx.validate()?;
        Ok(tx)
    }

    /// Check that the mandatory fields are present
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.candidate.is_empty() {
            return Err(ValidationError::MissingField("candidate"));
        }
        if self.voter_hash.is_empty() {
            return Err(ValidationError::MissingField("voterhash"));
        }
        Ok(())
    }
}

// ============================================================================
// BLOCK
// ============================================================================

/// A block in the vote chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub timestamp: String,
    pub previous_hash: String,
    #[serde(default)]
    pub nonce: u64,
    #[serde(rename = "blockhash", default = "unsealed_hash")]
    pub block_hash: String,
}

fn unsealed_hash() -> String {
    UNSEALED_HASH.to_string()
}

impl Block {
    /// Create an unsealed block (nonce 0, hash placeholder)
    pub fn new(index: u64, transactions: Vec<Transaction>, timestamp: &str, previous_hash: &str) -> Self {
        Self {
            index,
            transactions,
            timestamp: timestamp.to_string(),
            previous_hash: previous_hash.to_string(),
            nonce: 0,
            block_hash: unsealed_hash(),
        }
    }

    /// The genesis block. Every field is fixed so that all nodes agree on its hash.
    pub fn genesis() -> Self {
        let mut block = Self::new(0, Vec::new(), "0", UNSEALED_HASH);
        block.block_hash = block.compute_hash();
        block
    }

    /// Canonical SHA-256 of the block, computed as if `block_hash` were
    /// still the unsealed placeholder. Never touches `self`.
    pub fn compute_hash(&self) -> String {
        HashTemplate::for_block(self).digest(self.nonce)
    }

    /// Whether the block has been given a hash
    pub fn is_sealed(&self) -> bool {
        self.block_hash != UNSEALED_HASH
    }

    /// Copy of this block with the hash cleared, e.g. a wire block whose
    /// `blockhash` field is really the proof being offered
    pub fn unsealed(&self) -> Self {
        Self {
            block_hash: unsealed_hash(),
            ..self.clone()
        }
    }

    /// Whether a hash string is a full digest carrying the difficulty prefix
    pub fn meets_difficulty(hash: &str) -> bool {
        hash.len() == HASH_HEX_LEN
            && hash.bytes().all(|b| b.is_ascii_hexdigit())
            && hash.bytes().take(DIFFICULTY).all(|b| b == b'0')
    }

    /// Voter hashes carried by this block, in order
    pub fn voter_hashes(&self) -> impl Iterator<Item = &str> {
        self.transactions.iter().map(|tx| tx.voter_hash.as_str())
    }
}
