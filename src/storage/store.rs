// SledChainStore - Persistent chain storage using sled
//
// Blocks live in their own tree keyed by big-endian index, so sled's key
// order is chain order and the tip is simply the last key.

use crate::ledger::Block;
use crate::storage::backend::{ChainIter, ChainStore};
use std::path::Path;
use thiserror::Error;

/// Tree names
mod trees {
    pub const BLOCKS: &str = "chain:blocks";
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Chain store backed by sled
///
/// Crash-safe embedded storage. Chain replacement is applied as a single
/// batch, so readers never observe a half-replaced chain.
pub struct SledChainStore {
    db: sled::Db,
    blocks: sled::Tree,
}

impl SledChainStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        let blocks = db.open_tree(trees::BLOCKS)?;
        Ok(Self { db, blocks })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    fn encode(block: &Block) -> Result<Vec<u8>, StoreError> {
        postcard::to_allocvec(block).map_err(|e| StoreError::SerializationFailed(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Block, StoreError> {
        postcard::from_bytes(bytes).map_err(|e| StoreError::DeserializationFailed(e.to_string()))
    }
}

impl ChainStore for SledChainStore {
    fn append_block(&mut self, block: Block) -> Result<(), StoreError> {
        let bytes = Self::encode(&block)?;
        self.blocks.insert(block.index.to_be_bytes(), bytes)?;
        self.flush()
    }

    fn latest_block(&self) -> Result<Option<Block>, StoreError> {
        match self.blocks.last()? {
            Some((_, bytes)) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn iterate_chain(&self) -> ChainIter<'_> {
        Box::new(self.blocks.iter().map(|entry| {
            let (_, bytes) = entry?;
            Self::decode(&bytes)
        }))
    }

    fn replace_chain(&mut self, chain: Vec<Block>) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for key in self.blocks.iter().keys() {
            batch.remove(key?);
        }
        for block in &chain {
            batch.insert(block.index.to_be_bytes().to_vec(), Self::encode(block)?);
        }
        self.blocks.apply_batch(batch)?;
        self.flush()
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.blocks.len())
    }
}
