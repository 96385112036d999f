// Storage module - PERSISTENCE
// Chain storage capability with in-memory and sled-backed implementations

mod backend;
mod store;

pub use backend::{ChainIter, ChainStore, MemoryChainStore};
pub use store::{SledChainStore, StoreError};
