// Proof-of-Work - Nonce search for sealing blocks
//
// The search is CPU-bound with no suspension point, so callers run it on a
// blocking worker and stop it through a CancelToken.

use crate::ledger::block::Block;
use crate::ledger::hashing::HashTemplate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Nonces tried between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Shared flag used to abort a running nonce search
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder of this token to stop
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Guard that cancels this token when dropped
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop { token: self.clone() }
    }
}

/// Cancels its token when it goes out of scope
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancelToken,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Find a nonce whose hash meets the difficulty target.
///
/// Resets the nonce to 0, leaves the winning nonce on the block and returns
/// its digest. Running it again on the same block reproduces the same result.
pub fn proof_of_work(block: &mut Block) -> String {
    let template = HashTemplate::for_block(block);
    let mut nonce: u64 = 0;

    loop {
        let digest = template.digest(nonce);
        if Block::meets_difficulty(&digest) {
            block.nonce = nonce;
            return digest;
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Nonce search that gives up when `cancel` fires or the nonce space runs out
pub fn proof_of_work_cancellable(block: &mut Block, cancel: &CancelToken) -> Option<String> {
    let template = HashTemplate::for_block(block);
    let mut nonce: u64 = 0;

    loop {
        let digest = template.digest(nonce);
        if Block::meets_difficulty(&digest) {
            block.nonce = nonce;
            return Some(digest);
        }

        nonce = nonce.checked_add(1)?;
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            tracing::debug!(index = block.index, nonce, "proof-of-work cancelled");
            return None;
        }
    }
}
