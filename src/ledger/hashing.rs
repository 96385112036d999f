// Canonical block hashing
//
// A block hashes as sorted-key JSON with ", " and ": " separators and
// ASCII-only string escapes:
//
//   {"blockhash": "0", "index": 1, "nonce": 42, "previous_hash": "...",
//    "timestamp": "...", "transactions": [{"candidate": "...",
//    "timestamp": "...", "voterhash": "..."}]}
//
// `nonce` is the only field that changes while mining, so the bytes before
// and after it are built once and the SHA-256 state over the prefix is reused.

use crate::ledger::block::{Block, Transaction, UNSEALED_HASH};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Pre-rendered canonical form of a block, minus its nonce
pub(crate) struct HashTemplate {
    prefix: Sha256,
    suffix: Vec<u8>,
}

impl HashTemplate {
    /// Render everything except the nonce
    pub(crate) fn for_block(block: &Block) -> Self {
        let mut head = String::with_capacity(64);
        head.push_str("{\"blockhash\": ");
        write_json_str(&mut head, UNSEALED_HASH);
        let _ = write!(head, ", \"index\": {}, \"nonce\": ", block.index);

        let mut tail = String::with_capacity(256);
        tail.push_str(", \"previous_hash\": ");
        write_json_str(&mut tail, &block.previous_hash);
        tail.push_str(", \"timestamp\": ");
        write_json_str(&mut tail, &block.timestamp);
        tail.push_str(", \"transactions\": [");
        for (i, tx) in block.transactions.iter().enumerate() {
            if i > 0 {
                tail.push_str(", ");
            }
            write_transaction(&mut tail, tx);
        }
        tail.push_str("]}");

        let mut prefix = Sha256::new();
        prefix.update(head.as_bytes());

        Self {
            prefix,
            suffix: tail.into_bytes(),
        }
    }

    /// Hex digest of the block at the given nonce
    pub(crate) fn digest(&self, nonce: u64) -> String {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(&self.suffix);
        hex::encode(hasher.finalize())
    }
}

fn write_transaction(out: &mut String, tx: &Transaction) {
    out.push_str("{\"candidate\": ");
    write_json_str(out, &tx.candidate);
    out.push_str(", \"timestamp\": ");
    write_json_str(out, &tx.timestamp);
    out.push_str(", \"voterhash\": ");
    write_json_str(out, &tx.voter_hash);
    out.push('}');
}

/// Quote and escape a string, emitting non-ASCII as \uXXXX (UTF-16 units)
fn write_json_str(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || !c.is_ascii() => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
