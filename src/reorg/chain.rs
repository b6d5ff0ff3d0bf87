//! Bounded window of canonical blocks.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use tracing::debug;

use crate::block::{Block, BlockEvent, Blocks, TxLocation};
use crate::error::{MonitorError, MonitorResult};

/// The locally accepted canonical chain, oldest block at the front.
///
/// Every adjacent pair is hash-linked and numbered consecutively; pushes that
/// would break this are rejected and leave the window unchanged. When the
/// window grows past `retention_limit` the oldest block is evicted.
///
/// All accessors take a single short-held lock. Windows are tens to hundreds
/// of blocks, so lookups are plain reverse scans.
#[derive(Debug)]
pub struct RetainedChain {
    blocks: Mutex<VecDeque<Block>>,
    retention_limit: usize,
}

impl RetainedChain {
    /// Create an empty chain retaining at most `retention_limit` blocks.
    #[must_use]
    pub fn new(retention_limit: usize) -> Self {
        Self {
            blocks: Mutex::new(VecDeque::with_capacity(retention_limit + 1)),
            retention_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Block>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of retained blocks.
    #[must_use]
    pub const fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    /// Append `block` on top of the current head.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::UnexpectedParentHash`] if `block` does not link to the head
    /// - [`MonitorError::UnexpectedBlockNumber`] if it is not numbered head + 1
    pub fn push(&self, block: Block) -> MonitorResult<()> {
        let mut blocks = self.lock();

        if let Some(head) = blocks.back() {
            if block.parent_hash != head.hash {
                return Err(MonitorError::UnexpectedParentHash {
                    expected: head.hash,
                    got: block.parent_hash,
                });
            }
            if block.number != head.number + 1 {
                return Err(MonitorError::UnexpectedBlockNumber {
                    expected: head.number + 1,
                    got: block.number,
                });
            }
        }

        blocks.push_back(block);
        while blocks.len() > self.retention_limit {
            if let Some(evicted) = blocks.pop_front() {
                debug!(block = evicted.number, hash = %evicted.hash, "Evicted block from retention window");
            }
        }
        Ok(())
    }

    /// Remove and return the head, `None` on an empty chain.
    pub fn pop(&self) -> Option<Block> {
        self.lock().pop_back()
    }

    /// Drop every retained block.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Newest block.
    #[must_use]
    pub fn head(&self) -> Option<Block> {
        self.lock().back().cloned()
    }

    /// Oldest block.
    #[must_use]
    pub fn tail(&self) -> Option<Block> {
        self.lock().front().cloned()
    }

    /// Number of retained blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no block is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the window, oldest first.
    #[must_use]
    pub fn blocks(&self) -> Blocks {
        self.lock().iter().cloned().collect()
    }

    /// Newest retained block with `hash`, optionally restricted to an event.
    #[must_use]
    pub fn find_block(&self, hash: B256, event: Option<BlockEvent>) -> Option<Block> {
        self.lock()
            .iter()
            .rev()
            .find(|b| b.hash == hash && event.map_or(true, |e| b.event == e))
            .cloned()
    }

    /// Newest retained block at `number` with the given event.
    #[must_use]
    pub fn block_by_number(&self, number: u64, event: BlockEvent) -> Option<Block> {
        self.lock()
            .iter()
            .rev()
            .find(|b| b.number == number && b.event == event)
            .cloned()
    }

    /// Locate a transaction by hash within the window.
    #[must_use]
    pub fn transaction(&self, hash: B256) -> Option<TxLocation> {
        self.lock().iter().rev().find_map(|block| {
            block
                .transactions
                .iter()
                .position(|tx| *tx == hash)
                .map(|index| TxLocation {
                    hash,
                    block_number: block.number,
                    block_hash: block.hash,
                    index,
                })
        })
    }

    /// Record settled log attachment for the retained block with `hash`.
    ///
    /// Returns `false` if the block is no longer retained.
    pub fn settle(&self, hash: B256, logs: Option<Vec<Log>>) -> bool {
        let mut blocks = self.lock();
        match blocks.iter_mut().rev().find(|b| b.hash == hash) {
            Some(block) => {
                block.settle(logs);
                true
            }
            None => false,
        }
    }
}
