//! Block records carried through the monitor.
//!
//! A [`Block`] holds the header fields needed to maintain chain linkage plus
//! the monitor-local metadata attached to it on its way to subscribers:
//! whether it was added to or removed from the canonical chain, the logs
//! fetched for it, and whether log attachment is settled.
//!
//! Batches of blocks ([`Blocks`]) are what subscribers receive. The
//! [`BlocksExt`] trait adds the lookups used on those batches.

use alloy::primitives::{Bloom, B256};
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};

/// An ordered batch of block events, oldest first.
pub type Blocks = Vec<Block>;

/// Whether a block joined or left the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockEvent {
    /// The block extends the canonical chain.
    #[default]
    Added,
    /// The block was reverted by a reorg.
    Removed,
}

/// Position of a transaction inside the retained window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    /// Transaction hash
    pub hash: B256,
    /// Number of the containing block
    pub block_number: u64,
    /// Hash of the containing block
    pub block_hash: B256,
    /// Index of the transaction within the block
    pub index: usize,
}

/// A block observed by the monitor.
///
/// Identity is `(number, hash)`; `parent_hash` links to the previous block.
/// Only `logs` and `ok` change after the block enters the retained chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,

    /// Block-level bloom filter over all logs
    pub logs_bloom: Bloom,

    /// Hashes of the transactions included in the block, in order
    pub transactions: Vec<B256>,

    /// Added to or removed from the canonical chain
    pub event: BlockEvent,

    /// Logs matching the configured topics, `None` until attached
    pub logs: Option<Vec<Log>>,

    /// Log attachment succeeded or was not needed
    pub ok: bool,
}

impl Block {
    /// Create a block from its identity fields (useful for testing).
    ///
    /// The bloom is zero, there are no transactions and the event is
    /// [`BlockEvent::Added`].
    #[must_use]
    pub fn new(number: u64, hash: B256, parent_hash: B256) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            timestamp: 0,
            logs_bloom: Bloom::ZERO,
            transactions: Vec::new(),
            event: BlockEvent::Added,
            logs: None,
            ok: false,
        }
    }

    /// Create a `Block` from an Alloy RPC block.
    ///
    /// Only transaction hashes are kept, so the block should be fetched with
    /// `BlockTransactionsKind::Hashes`.
    #[must_use]
    pub fn from_rpc(block: &alloy::rpc::types::Block) -> Self {
        Self {
            number: block.header.number,
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            timestamp: block.header.timestamp,
            logs_bloom: block.header.logs_bloom,
            transactions: block
                .transactions
                .as_hashes()
                .map(<[B256]>::to_vec)
                .unwrap_or_default(),
            event: BlockEvent::Added,
            logs: None,
            ok: false,
        }
    }

    /// Set the bloom filter.
    #[must_use]
    pub const fn with_bloom(mut self, logs_bloom: Bloom) -> Self {
        self.logs_bloom = logs_bloom;
        self
    }

    /// Set the transaction hashes.
    #[must_use]
    pub fn with_transactions(mut self, transactions: Vec<B256>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Whether the block bloom proves there are no logs at all.
    #[must_use]
    pub fn has_empty_bloom(&self) -> bool {
        self.logs_bloom == Bloom::ZERO
    }

    /// Mark log attachment as settled with the given logs.
    pub fn settle(&mut self, logs: Option<Vec<Log>>) {
        self.logs = logs;
        self.ok = true;
    }

    /// Mark log attachment as pending backfill.
    pub fn unsettle(&mut self) {
        self.logs = None;
        self.ok = false;
    }
}

/// Lookups over a batch or window of blocks.
pub trait BlocksExt {
    /// Newest block with [`BlockEvent::Added`].
    fn latest_added(&self) -> Option<&Block>;

    /// Whether every block has settled log attachment.
    fn is_ok(&self) -> bool;

    /// Whether the batch contains any removal.
    fn has_reorg(&self) -> bool;

    /// Newest block with the given hash, optionally restricted to an event.
    fn find_block(&self, hash: B256, event: Option<BlockEvent>) -> Option<&Block>;

    /// Whether `block` already appears with the given event and linkage.
    fn event_exists(&self, block: &Block, event: BlockEvent) -> bool;
}

impl BlocksExt for [Block] {
    fn latest_added(&self) -> Option<&Block> {
        self.iter().rev().find(|b| b.event == BlockEvent::Added)
    }

    fn is_ok(&self) -> bool {
        self.iter().all(|b| b.ok)
    }

    fn has_reorg(&self) -> bool {
        self.iter().any(|b| b.event == BlockEvent::Removed)
    }

    fn find_block(&self, hash: B256, event: Option<BlockEvent>) -> Option<&Block> {
        self.iter()
            .rev()
            .find(|b| b.hash == hash && event.map_or(true, |e| b.event == e))
    }

    fn event_exists(&self, block: &Block, event: BlockEvent) -> bool {
        self.find_block(block.hash, Some(event)).is_some_and(|b| {
            b.parent_hash == block.parent_hash && b.number == block.number
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    #[test]
    fn test_block_creation() {
        let block = Block::new(10, h(10), h(9));
        assert_eq!(block.number, 10);
        assert_eq!(block.event, BlockEvent::Added);
        assert!(block.logs.is_none());
        assert!(!block.ok);
        assert!(block.has_empty_bloom());
    }

    #[test]
    fn test_settle_and_unsettle() {
        let mut block = Block::new(1, h(1), h(0));
        block.settle(Some(Vec::new()));
        assert!(block.ok);
        assert_eq!(block.logs.as_deref(), Some(&[][..]));

        block.unsettle();
        assert!(!block.ok);
        assert!(block.logs.is_none());
    }

    #[test]
    fn test_batch_lookups() {
        let mut removed = Block::new(3, h(3), h(2));
        removed.event = BlockEvent::Removed;
        removed.ok = true;
        let added = Block::new(3, h(0x33), h(2));
        let batch = vec![removed.clone(), added.clone()];

        assert!(batch.has_reorg());
        assert!(!batch.is_ok());
        assert_eq!(batch.latest_added().map(|b| b.hash), Some(h(0x33)));
        assert!(batch.find_block(h(3), None).is_some());
        assert!(batch.find_block(h(3), Some(BlockEvent::Added)).is_none());
        assert!(batch.event_exists(&removed, BlockEvent::Removed));
        assert!(!batch.event_exists(&added, BlockEvent::Removed));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&BlockEvent::Removed).unwrap();
        assert_eq!(json, "\"removed\"");
    }
}
