// Chain storage capability
//
// The ledger only ever needs four things from storage. Keeping the trait this
// narrow lets the same mining and consensus code run over memory or sled.

use crate::ledger::Block;
use crate::storage::StoreError;

/// Iterator over a stored chain, genesis first
pub type ChainIter<'a> = Box<dyn Iterator<Item = Result<Block, StoreError>> + 'a>;

/// Ordered block storage
pub trait ChainStore: Send {
    /// Append a sealed block at the tip
    fn append_block(&mut self, block: Block) -> Result<(), StoreError>;

    /// The block at the tip, if any
    fn latest_block(&self) -> Result<Option<Block>, StoreError>;

    /// Iterate over every block from genesis to tip
    fn iterate_chain(&self) -> ChainIter<'_>;

    /// Swap the whole chain for another in one step
    fn replace_chain(&mut self, chain: Vec<Block>) -> Result<(), StoreError>;

    /// Number of stored blocks
    fn len(&self) -> Result<usize, StoreError>;

    /// Check if no blocks are stored
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Collect the full chain
    fn load_chain(&self) -> Result<Vec<Block>, StoreError> {
        self.iterate_chain().collect()
    }
}

/// In-process chain held in a Vec
#[derive(Clone, Debug, Default)]
pub struct MemoryChainStore {
    blocks: Vec<Block>,
}

impl MemoryChainStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemoryChainStore {
    fn append_block(&mut self, block: Block) -> Result<(), StoreError> {
        self.blocks.push(block);
        Ok(())
    }

    fn latest_block(&self) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.last().cloned())
    }

    fn iterate_chain(&self) -> ChainIter<'_> {
        Box::new(self.blocks.iter().cloned().map(Ok))
    }

    fn replace_chain(&mut self, chain: Vec<Block>) -> Result<(), StoreError> {
        self.blocks = chain;
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.blocks.len())
    }
}
