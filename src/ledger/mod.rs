// Ledger module - THE VOTE CHAIN
// Blocks, canonical hashing, the pending pool, proof-of-work and admission

mod block;
mod chain;
mod hashing;
mod pool;
mod work;

pub use block::{
    timestamp_now, Block, Transaction, ValidationError, DIFFICULTY, HASH_HEX_LEN, UNSEALED_HASH,
};
pub use chain::{Admission, LedgerError, Ledger, LengthPolicy, MineOutcome, RejectReason};
pub use pool::{PoolError, TransactionPool, VoteLocation};
pub use work::{proof_of_work, proof_of_work_cancellable, CancelOnDrop, CancelToken};
