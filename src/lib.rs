// votechain - Proof-of-work vote ledger replicated across peer nodes

pub mod ledger;
pub mod node;
pub mod storage;
pub mod sync;
