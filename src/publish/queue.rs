//! Trailing publish backlog.

use std::collections::VecDeque;

use tracing::debug;

use crate::block::{Block, BlockEvent, Blocks};
use crate::error::{MonitorError, MonitorResult};

/// A held-back batch and the highest block number it contains.
#[derive(Debug, Clone)]
struct Entry {
    blocks: Blocks,
    max_number: u64,
}

impl Entry {
    fn new(blocks: Blocks) -> Option<Self> {
        let max_number = blocks.iter().map(|b| b.number).max()?;
        Some(Self { blocks, max_number })
    }
}

/// Holds event batches back until they trail the head by a safety margin.
///
/// Batches are released strictly in enqueue order. A batch leaves the queue
/// only when every block in it is at or below the release bound, so the
/// released output is always a prefix of what went in.
///
/// A [`BlockEvent::Removed`] block whose matching [`BlockEvent::Added`] is
/// still held back cancels it: neither is ever published.
#[derive(Debug)]
pub struct TrailingPublishQueue {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl TrailingPublishQueue {
    /// Create a queue holding at most `capacity` blocks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Maximum number of held blocks.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of blocks currently held back.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.iter().map(|e| e.blocks.len()).sum()
    }

    /// Whether nothing is held back.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a batch to the backlog.
    ///
    /// # Errors
    ///
    /// [`MonitorError::QueueFull`] if the backlog would exceed its capacity.
    /// The queue is left unchanged in that case.
    pub fn enqueue(&mut self, batch: Blocks) -> MonitorResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let pending = self.pending();
        if pending + batch.len() > self.capacity {
            return Err(MonitorError::QueueFull {
                capacity: self.capacity,
                pending,
                incoming: batch.len(),
            });
        }

        let mut kept: Blocks = Vec::with_capacity(batch.len());
        for block in batch {
            if block.event == BlockEvent::Removed
                && (Self::cancel_in(&mut kept, &block) || self.cancel_held(&block))
            {
                debug!(
                    block = block.number,
                    hash = %block.hash,
                    "Dropped unpublished block reverted by reorg"
                );
                continue;
            }
            kept.push(block);
        }

        if let Some(entry) = Entry::new(kept) {
            self.entries.push_back(entry);
        }
        Ok(())
    }

    /// Release the longest prefix of the backlog at or below `max_number`.
    ///
    /// `None` releases everything. Returns `None` if nothing is releasable.
    pub fn dequeue(&mut self, max_number: Option<u64>) -> Option<Blocks> {
        let mut released = Blocks::new();
        while let Some(front) = self.entries.front() {
            if max_number.is_some_and(|max| front.max_number > max) {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                released.extend(entry.blocks);
            }
        }

        (!released.is_empty()).then_some(released)
    }

    /// Drop the Added counterpart of `removed` from `blocks`, if present.
    fn cancel_in(blocks: &mut Blocks, removed: &Block) -> bool {
        let position = blocks.iter().rposition(|b| {
            b.event == BlockEvent::Added && b.hash == removed.hash && b.number == removed.number
        });
        match position {
            Some(i) => {
                blocks.remove(i);
                true
            }
            None => false,
        }
    }

    /// Drop the held Added counterpart of `removed`, newest entry first.
    fn cancel_held(&mut self, removed: &Block) -> bool {
        let Some(index) = (0..self.entries.len())
            .rev()
            .find(|&i| Self::cancel_in(&mut self.entries[i].blocks, removed))
        else {
            return false;
        };

        match Entry::new(std::mem::take(&mut self.entries[index].blocks)) {
            Some(entry) => self.entries[index] = entry,
            None => {
                self.entries.remove(index);
            }
        }
        true
    }
}
