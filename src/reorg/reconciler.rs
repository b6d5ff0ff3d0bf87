//! Canonical chain reconciliation.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chain::RetainedChain;
use crate::block::{Block, BlockEvent, Blocks};
use crate::error::{MonitorError, MonitorResult};
use crate::rpc::{ChainClient, RetryingFetcher};

/// Folds the next network block into the [`RetainedChain`].
///
/// ## Algorithm
///
/// 1. If the chain is empty or the candidate's parent is the head, the chain
///    simply extends
/// 2. Otherwise, if the head is at or above the candidate's parent height,
///    it is popped and emitted as [`BlockEvent::Removed`] and the reconciler
///    pauses `poll_interval * events so far` (capped)
/// 3. If the candidate still sits above the new head, its parent is fetched
///    by hash and becomes the new candidate; otherwise the same candidate is
///    checked again against the shorter chain
/// 4. Once a candidate links (or the window is exhausted), the collected
///    ancestors are replayed oldest first as [`BlockEvent::Added`]
///
/// The emitted events are the edit script from the old window to the new
/// one: removals newest first, then additions oldest first.
///
/// A failed fetch aborts the walk. Blocks already popped stay popped and
/// their removals stay in `events`; the next poll resumes from the shorter
/// chain.
#[derive(Debug)]
pub struct ChainReconciler<'a, C> {
    chain: &'a RetainedChain,
    fetcher: &'a RetryingFetcher<C>,
    poll_interval: Duration,
    max_unwind_pause: Duration,
    shutdown: &'a CancellationToken,
    debug_logging: bool,
}

impl<'a, C: ChainClient> ChainReconciler<'a, C> {
    /// Create a reconciler over `chain`.
    pub const fn new(
        chain: &'a RetainedChain,
        fetcher: &'a RetryingFetcher<C>,
        poll_interval: Duration,
        max_unwind_pause: Duration,
        shutdown: &'a CancellationToken,
    ) -> Self {
        Self {
            chain,
            fetcher,
            poll_interval,
            max_unwind_pause,
            shutdown,
            debug_logging: false,
        }
    }

    /// Emit a debug line for every block the walk considers.
    #[must_use]
    pub const fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Pause before fetching the next ancestor, given `emitted` events so far.
    #[must_use]
    pub fn unwind_pause(&self, emitted: usize) -> Duration {
        let emitted = u32::try_from(emitted).unwrap_or(u32::MAX);
        self.poll_interval
            .saturating_mul(emitted)
            .min(self.max_unwind_pause)
    }

    /// Reconcile `next` against the chain, appending events to `events`.
    ///
    /// # Errors
    ///
    /// - fetch errors from the ancestor walk ([`MonitorError::NotFound`],
    ///   [`MonitorError::MaxAttemptsExceeded`])
    /// - integrity violations from [`RetainedChain::push`]
    /// - [`MonitorError::Cancelled`] if shutdown fires
    pub async fn reconcile(&self, next: Block, events: &mut Blocks) -> MonitorResult<()> {
        // Candidates waiting to be replayed, newest at the bottom
        let mut pending = vec![next];
        let mut unwound = 0usize;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            let Some(candidate) = pending.last() else {
                break;
            };
            if self.debug_logging {
                debug!(
                    block = candidate.number,
                    hash = %candidate.hash,
                    parent = %candidate.parent_hash,
                    txs = candidate.transactions.len(),
                    "New block"
                );
            }

            let Some(head) = self.chain.head() else {
                break;
            };
            if candidate.parent_hash == head.hash {
                break;
            }

            let (number, parent_hash) = (candidate.number, candidate.parent_hash);

            // The head sits at or above the candidate's parent height, on another branch
            if number <= head.number + 1 {
                let Some(mut popped) = self.chain.pop() else {
                    break;
                };
                popped.event = BlockEvent::Removed;
                popped.ok = true;

                warn!(
                    block = popped.number,
                    hash = %popped.hash,
                    parent = %popped.parent_hash,
                    "Block reorg, reverting block"
                );
                events.push(popped);
                unwound += 1;

                let pause = self.unwind_pause(events.len());
                tokio::select! {
                    () = self.shutdown.cancelled() => return Err(MonitorError::Cancelled),
                    () = tokio::time::sleep(pause) => {}
                }
            }

            // Otherwise the same candidate is checked against the new head
            if number > head.number {
                let ancestor = self.fetcher.block_by_hash(parent_hash).await?;
                pending.push(ancestor);
            }
        }

        while let Some(mut block) = pending.pop() {
            block.event = BlockEvent::Added;
            block.ok = false;
            block.logs = None;
            self.chain.push(block.clone())?;
            events.push(block);
        }

        if unwound > 0 {
            info!(
                depth = unwound,
                head = self.chain.head().map(|b| b.number),
                "Reorg resolved"
            );
        }

        Ok(())
    }
}
