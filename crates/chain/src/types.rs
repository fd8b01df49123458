//! Core chain-level types shared by the gateway, resolver and scanner.

use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};

/// Inclusive block range `[start_block, end_block]`.
///
/// Invariant: `start_block <= end_block`. A violated range is never scanned;
/// the caller skips the controller and logs a warning instead of collapsing
/// the range to a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start_block: u64,
    pub end_block: u64,
}

impl BlockRange {
    pub fn new(start_block: u64, end_block: u64) -> Self {
        Self {
            start_block,
            end_block,
        }
    }

    /// Number of blocks covered (inclusive bounds).
    pub fn len(&self) -> u64 {
        self.end_block.saturating_sub(self.start_block) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.start_block > self.end_block
    }

    /// True when the range cannot be scanned as a multi-block window.
    pub fn is_degenerate(&self) -> bool {
        self.start_block >= self.end_block
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start_block, self.end_block)
    }
}

/// A raw log entry as returned by `eth_getLogs`, opaque until normalized.
///
/// Uniquely identified by `(transaction_hash, log_index)`; chunk retries and
/// overlapping windows are deduplicated on that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEvent {
    pub address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl RawLogEvent {
    /// Convert from an alloy RPC log. Returns `None` for pending logs that
    /// are missing block/transaction placement; those cannot be ordered and
    /// are dropped before normalization.
    pub fn from_log(log: &Log) -> Option<Self> {
        Some(Self {
            address: log.address(),
            block_number: log.block_number?,
            transaction_hash: log.transaction_hash?,
            transaction_index: log.transaction_index?,
            log_index: log.log_index?,
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
        })
    }

    /// Dedup key across chunk boundaries.
    pub fn key(&self) -> (B256, u64) {
        (self.transaction_hash, self.log_index)
    }

    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}
