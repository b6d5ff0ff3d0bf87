//! Chain reorganization handling.
//!
//! This module keeps the monitor's canonical view of the chain consistent
//! with the node by:
//! - Retaining a bounded, hash-linked window of accepted blocks
//! - Verifying that every new block's parent hash matches the retained head
//! - Walking back through forked ancestry on mismatch, reverting retained
//!   blocks and replaying the node's branch forward
//!
//! ## How It Works
//!
//! 1. **Retained Window**: [`RetainedChain`] stores the newest blocks, oldest first
//! 2. **Parent Hash Verification**: a block whose parent is the head extends the chain
//! 3. **Ancestor Walk**: otherwise the head is reverted and the block's parent is
//!    fetched by hash, until the fetched branch links back into the window
//! 4. **Replay**: the fetched branch is pushed oldest first
//!
//! ## Reorg Frequency on Ethereum
//!
//! - 1-block reorgs: Several times per day
//! - 2-3 block reorgs: Multiple times per week
//! - 4-7 block reorgs: Weekly to monthly
//! - Finalized blocks (2 epochs = ~12.8 min): Considered permanent
//!
//! ## Example
//!
//! ```rust,ignore
//! use eth_head_monitor::reorg::{ChainReconciler, RetainedChain};
//!
//! # async fn example(fetcher: &RetryingFetcher<Provider>, token: &CancellationToken) -> MonitorResult<()> {
//! let chain = RetainedChain::new(200);
//! let reconciler = ChainReconciler::new(&chain, fetcher, interval, max_pause, token);
//!
//! let mut events = Vec::new();
//! let next = fetcher.block_by_number(None).await?;
//! reconciler.reconcile(next, &mut events).await?;
//! if events.has_reorg() {
//!     println!("Reorg! {} events", events.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod reconciler;

pub use chain::RetainedChain;
pub use reconciler::ChainReconciler;
