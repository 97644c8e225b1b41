// src/utils.rs
// Utility functions for the ledger indexer

use crate::types::RawLog;

/// Splits an inclusive block range into consecutive `(start_block, end_block)` windows
/// of at most `span` blocks. Used to keep `eth_getLogs` requests under node limits.
pub fn create_block_chunks(from_block: u64, to_block: u64, span: u64) -> Vec<(u64, u64)> {
    let span = span.max(1);
    let mut chunks = Vec::new();
    let mut current_from = from_block;
    while current_from <= to_block {
        let current_to = current_from.saturating_add(span - 1).min(to_block);
        chunks.push((current_from, current_to));
        if current_to == u64::MAX {
            break;
        }
        current_from = current_to + 1;
    }
    chunks
}

/// Puts logs into chain order: block, then transaction, then log index. Nodes do not
/// promise this order and projection of logs sharing a transaction depends on it.
pub fn sort_chain_order(logs: &mut [RawLog]) {
    logs.sort_by_key(RawLog::position);
}
