// Chain Tests
// Block admission, chain validity, mining and chain replacement

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use votechain::ledger::{
    proof_of_work, Admission, Block, CancelToken, Ledger, LedgerError, LengthPolicy, MineOutcome,
    PoolError, RejectReason, Transaction, ValidationError, VoteLocation,
};

fn vote(voter: &str) -> Transaction {
    Transaction::with_timestamp("Alice", voter, "2024-01-01 10:00:00.000000").unwrap()
}

fn ledger() -> Ledger {
    let ledger = Ledger::in_memory();
    ledger.create_genesis().unwrap();
    ledger
}

/// Next block on top of the ledger's tip, sealed with a valid proof
fn sealed_next(ledger: &Ledger, voters: &[&str]) -> (Block, String) {
    let last = ledger.last_block().unwrap();
    let txs = voters.iter().map(|v| vote(v)).collect();
    let mut block = Block::new(last.index + 1, txs, "2024-01-01 10:00:01.000000", &last.block_hash);
    let proof = proof_of_work(&mut block);
    (block, proof)
}

/// Block with an arbitrary index on top of `parent`, carrying a valid proof
fn sealed_at(parent: &Block, index: u64, voter: &str) -> Block {
    let mut block = Block::new(index, vec![vote(voter)], "2024-01-01 10:00:01.000000", &parent.block_hash);
    block.block_hash = proof_of_work(&mut block);
    block
}

fn ledger_with_votes(voters: &[&str]) -> Ledger {
    let ledger = ledger();
    for voter in voters {
        let (block, proof) = sealed_next(&ledger, &[voter]);
        assert!(ledger.add_block(block, &proof).unwrap().is_accepted());
    }
    ledger
}

// ============================================================================
// ADMISSION
// ============================================================================

#[test]
fn test_add_block_accepts_valid_block() {
    let ledger = ledger();
    let (block, proof) = sealed_next(&ledger, &["v1"]);

    let admission = ledger.add_block(block, &proof).unwrap();

    assert_eq!(admission, Admission::Accepted { index: 1 });
    assert_eq!(ledger.len().unwrap(), 2);
    assert_eq!(ledger.last_block().unwrap().block_hash, proof);
    assert!(ledger.has_voted("v1"));
}

#[test]
fn test_add_block_rejects_wrong_previous_hash() {
    let ledger = ledger();
    let mut block = Block::new(1, vec![vote("v1")], "t", "not-the-tip");
    let proof = proof_of_work(&mut block);

    let admission = ledger.add_block(block, &proof).unwrap();

    assert!(matches!(admission, Admission::Rejected(RejectReason::StaleParent { .. })));
    assert_eq!(ledger.len().unwrap(), 1);
}

#[test]
fn test_add_block_rejects_proof_without_prefix() {
    let ledger = ledger();
    let (block, _) = sealed_next(&ledger, &["v1"]);
    let bogus = format!("ffff{}", "a".repeat(60));

    let admission = ledger.add_block(block, &bogus).unwrap();

    assert_eq!(admission, Admission::Rejected(RejectReason::InvalidProof));
}

#[test]
fn test_add_block_rejects_proof_for_other_content() {
    let ledger = ledger();
    let (mut block, proof) = sealed_next(&ledger, &["v1"]);
    block.transactions[0].candidate = "Mallory".to_string();

    let admission = ledger.add_block(block, &proof).unwrap();

    assert_eq!(admission, Admission::Rejected(RejectReason::InvalidProof));
    assert!(!ledger.has_voted("v1"));
}

#[test]
fn test_add_block_rejects_committed_voter() {
    let ledger = ledger_with_votes(&["v1"]);
    let (block, proof) = sealed_next(&ledger, &["v1"]);

    let admission = ledger.add_block(block, &proof).unwrap();

    assert_eq!(
        admission,
        Admission::Rejected(RejectReason::DuplicateVote("v1".to_string()))
    );
    assert_eq!(ledger.len().unwrap(), 2);
}

#[test]
fn test_add_block_rejects_index_gap() {
    let ledger = ledger();
    let tip = ledger.last_block().unwrap();
    let mut block = Block::new(5, vec![vote("v1")], "t", &tip.block_hash);
    let proof = proof_of_work(&mut block);

    let admission = ledger.add_block(block, &proof).unwrap();

    assert_eq!(
        admission,
        Admission::Rejected(RejectReason::Malformed(ValidationError::IndexGap {
            previous: 0,
            actual: 5,
        }))
    );
}

#[test]
fn test_add_block_rejects_empty_and_repeated() {
    let ledger = ledger();

    let (empty, proof) = sealed_next(&ledger, &[]);
    assert_eq!(
        ledger.add_block(empty, &proof).unwrap(),
        Admission::Rejected(RejectReason::Malformed(ValidationError::EmptyBlock(1)))
    );

    let (repeated, proof) = sealed_next(&ledger, &["v1", "v1"]);
    assert_eq!(
        ledger.add_block(repeated, &proof).unwrap(),
        Admission::Rejected(RejectReason::Malformed(ValidationError::RepeatedVoter(
            "v1".to_string()
        )))
    );
}

#[test]
fn test_accepted_block_clears_pending_vote() {
    let ledger = ledger();
    ledger.submit_transaction("Alice", "v1").unwrap();
    let (block, proof) = sealed_next(&ledger, &["v1"]);

    ledger.add_block(block, &proof).unwrap();

    assert_eq!(ledger.pending_count(), 0);
}

// ============================================================================
// VALIDITY
// ============================================================================

#[test]
fn test_chain_validity() {
    let ledger = ledger_with_votes(&["v1", "v2", "v3"]);

    assert!(ledger.check_validity().unwrap());
    assert!(Ledger::check_chain_validity(&[Block::genesis()]));
    assert!(!Ledger::check_chain_validity(&[]));
}

#[test]
fn test_tampered_transaction_detected() {
    let ledger = ledger_with_votes(&["v1", "v2", "v3"]);
    let mut chain = ledger.chain().unwrap();

    chain[2].transactions[0].candidate = "Mallory".to_string();

    assert!(!Ledger::check_chain_validity(&chain));
}

#[test]
fn test_broken_link_detected() {
    let ledger = ledger_with_votes(&["v1", "v2"]);
    let mut chain = ledger.chain().unwrap();

    chain.remove(1);

    assert!(!Ledger::check_chain_validity(&chain));
}

#[test]
fn test_validity_check_does_not_mutate() {
    let ledger = ledger_with_votes(&["v1"]);
    let chain = ledger.chain().unwrap();

    Ledger::check_chain_validity(&chain);

    assert_eq!(ledger.chain().unwrap(), chain);
}

#[test]
fn test_out_of_sequence_indices_invalid() {
    let genesis = Block::genesis();
    let fifth = sealed_at(&genesis, 5, "v1");
    let third = sealed_at(&fifth, 3, "v2");

    assert!(!Ledger::check_chain_validity(&[genesis.clone(), fifth.clone(), third]));
    assert!(!Ledger::check_chain_validity(&[fifth]));

    let first = sealed_at(&genesis, 1, "v1");
    let repeated = sealed_at(&first, 1, "v2");
    assert!(!Ledger::check_chain_validity(&[genesis, first, repeated]));
}

#[test]
fn test_voter_committed_twice_invalid() {
    let genesis = Block::genesis();
    let first = sealed_at(&genesis, 1, "v1");
    let again = sealed_at(&first, 2, "v1");

    assert!(!Ledger::check_chain_validity(&[genesis, first, again]));
}

// ============================================================================
// SUBMISSION AND MINING
// ============================================================================

#[test]
fn test_submit_duplicate_votes() {
    let ledger = ledger_with_votes(&["v1"]);

    let committed = ledger.submit_transaction("Bob", "v1");
    assert!(matches!(
        committed,
        Err(LedgerError::Pool(PoolError::DuplicateVote { location: VoteLocation::Committed, .. }))
    ));

    ledger.submit_transaction("Bob", "v2").unwrap();
    let pending = ledger.submit_transaction("Carol", "v2");
    assert!(matches!(
        pending,
        Err(LedgerError::Pool(PoolError::DuplicateVote { location: VoteLocation::Pending, .. }))
    ));
}

#[test]
fn test_submit_rejects_missing_fields() {
    let ledger = ledger();

    let result = ledger.submit_transaction("", "v1");

    assert!(matches!(result, Err(LedgerError::Validation(_))));
    assert_eq!(ledger.pending_count(), 0);
}

#[test]
fn test_mine_end_to_end() {
    let ledger = ledger();
    ledger.submit_transaction("Alice", "v1").unwrap();
    ledger.submit_transaction("Bob", "v2").unwrap();

    let outcome = ledger.mine(&CancelToken::new()).unwrap();

    assert!(matches!(outcome, MineOutcome::Mined { index: 2, .. }));
    assert_eq!(outcome.mined_blocks(), &ledger.chain().unwrap()[1..]);
    assert_eq!(ledger.pending_count(), 0);
    assert!(ledger.check_validity().unwrap());
    assert!(!ledger.is_mining());

    let chain = ledger.chain().unwrap();
    let voters: Vec<_> = chain.iter().flat_map(|b| b.voter_hashes()).collect();
    assert_eq!(voters, vec!["v1", "v2"]);
    for block in &chain[1..] {
        assert!(Block::meets_difficulty(&block.block_hash));
        assert_eq!(block.transactions.len(), 1);
    }
}

#[test]
fn test_mine_cancelled_keeps_vote_pending() {
    let ledger = ledger();
    ledger.submit_transaction("Alice", "v1").unwrap();
    let token = CancelToken::new();
    token.cancel();

    match ledger.mine(&token) {
        Err(LedgerError::MiningCancelled) => {
            assert_eq!(ledger.pending_count(), 1);
            assert_eq!(ledger.len().unwrap(), 1);
        }
        // The proof fell inside the first check interval
        Ok(MineOutcome::Mined { blocks, .. }) => assert_eq!(blocks.len(), 1),
        other => panic!("unexpected mining result: {:?}", other),
    }
    assert!(!ledger.is_mining());
}

#[test]
fn test_cancelled_run_keeps_blocks_already_mined() {
    // A pre-cancelled token still lets a proof found in the first check
    // interval through, so some runs commit the first vote and stop
    let mut partial = false;
    for _ in 0..1000 {
        let ledger = ledger();
        ledger.submit_transaction("Alice", "v1").unwrap();
        ledger.submit_transaction("Bob", "v2").unwrap();
        let token = CancelToken::new();
        token.cancel();

        match ledger.mine(&token) {
            Err(LedgerError::MiningCancelled) => {
                assert_eq!(ledger.len().unwrap(), 1);
                assert_eq!(ledger.pending_count(), 2);
            }
            Ok(outcome) => {
                let blocks = outcome.mined_blocks();
                assert!(!blocks.is_empty());
                assert_eq!(&ledger.chain().unwrap()[1..], blocks);
                assert_eq!(ledger.pending_count(), 2 - blocks.len());
                partial = blocks.len() == 1;
            }
            Err(e) => panic!("unexpected mining error: {}", e),
        }
        assert!(!ledger.is_mining());
        if partial {
            break;
        }
    }
    assert!(partial);
}

#[test]
fn test_concurrent_mine_is_rejected() {
    let ledger = Arc::new(ledger());
    for i in 0..50 {
        ledger.submit_transaction("Alice", &format!("v{}", i)).unwrap();
    }

    let token = CancelToken::new();
    let runner = {
        let ledger = Arc::clone(&ledger);
        let token = token.clone();
        thread::spawn(move || ledger.mine(&token))
    };

    let started = Instant::now();
    while !ledger.is_mining() {
        assert!(started.elapsed() < Duration::from_secs(10), "first run never started");
        thread::yield_now();
    }
    let second = ledger.mine(&CancelToken::new()).unwrap();
    token.cancel();
    let first = runner.join().unwrap();

    assert_eq!(second, MineOutcome::AlreadyMining);
    let mined = match first {
        Ok(outcome) => outcome.mined_blocks().len(),
        Err(LedgerError::MiningCancelled) => 0,
        Err(e) => panic!("unexpected mining error: {}", e),
    };
    assert_eq!(ledger.len().unwrap(), 1 + mined);
    assert_eq!(ledger.pending_count(), 50 - mined);
    assert!(!ledger.is_mining());
}

// ============================================================================
// REPLACEMENT
// ============================================================================

#[test]
fn test_replace_chain_policies() {
    let local = ledger_with_votes(&["a1"]);
    let same_length = ledger_with_votes(&["b1"]).chain().unwrap();

    assert!(!local.replace_chain_if(same_length.clone(), LengthPolicy::Longer).unwrap());
    assert!(local.has_voted("a1"));

    assert!(local.replace_chain_if(same_length, LengthPolicy::AtLeastAsLong).unwrap());
    assert!(local.has_voted("b1"));
    assert!(!local.has_voted("a1"));
}

#[test]
fn test_replacement_purges_committed_pending() {
    let local = ledger();
    local.submit_transaction("Alice", "v1").unwrap();
    local.submit_transaction("Bob", "v9").unwrap();
    let longer = ledger_with_votes(&["v1", "v2"]).chain().unwrap();

    assert!(local.replace_chain_if(longer, LengthPolicy::Longer).unwrap());

    let pending: Vec<_> = local
        .pending_transactions()
        .into_iter()
        .map(|tx| tx.voter_hash)
        .collect();
    assert_eq!(pending, vec!["v9".to_string()]);
    assert!(local.has_voted("v2"));
}

#[test]
fn test_force_replace_rejects_invalid_chain() {
    let local = ledger_with_votes(&["v1"]);
    let mut forged = ledger_with_votes(&["x1", "x2"]).chain().unwrap();
    forged[1].transactions[0].candidate = "Mallory".to_string();

    let result = local.force_replace_chain(forged);

    assert!(matches!(result, Err(LedgerError::InvalidChain)));
    assert!(local.has_voted("v1"));
}

#[test]
fn test_replacement_refuses_broken_structure() {
    let local = ledger_with_votes(&["v1"]);
    let genesis = Block::genesis();
    let fifth = sealed_at(&genesis, 5, "x1");
    let third = sealed_at(&fifth, 3, "x2");
    let first = sealed_at(&genesis, 1, "y1");
    let again = sealed_at(&first, 2, "y1");

    let shuffled = local.replace_chain_if(vec![genesis.clone(), fifth, third], LengthPolicy::Longer);
    assert!(matches!(shuffled, Err(LedgerError::InvalidChain)));

    let doubled = local.force_replace_chain(vec![genesis, first, again]);
    assert!(matches!(doubled, Err(LedgerError::InvalidChain)));

    assert_eq!(local.len().unwrap(), 2);
    assert!(local.has_voted("v1"));
    assert!(local.check_validity().unwrap());
}

#[test]
fn test_force_replace_accepts_shorter_valid_chain() {
    let local = ledger_with_votes(&["v1", "v2"]);

    local.force_replace_chain(vec![Block::genesis()]).unwrap();

    assert_eq!(local.len().unwrap(), 1);
    assert!(local.already_voted().is_empty());
}
