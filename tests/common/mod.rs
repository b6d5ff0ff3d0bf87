//! Shared helpers for integration tests.
//!
//! [`ScriptedNode`] is an in-memory node whose canonical chain the test
//! drives directly: extend it, fork it, make calls fail.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Bloom, B256};
use alloy::rpc::types::Log;
use eth_head_monitor::block::{Block, Blocks};
use eth_head_monitor::rpc::{ChainClient, ClientError};
use eth_head_monitor::Subscription;

/// Hash of block `n` on fork `tag`.
pub fn h(tag: u8, n: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    B256::from(bytes)
}

#[derive(Default)]
struct NodeState {
    by_hash: HashMap<B256, Block>,
    canonical: BTreeMap<u64, B256>,
    logs: HashMap<B256, Vec<Log>>,
    log_failures: HashMap<B256, u32>,
    failures: u32,
    block_calls: u32,
}

/// In-memory node with a scriptable canonical chain.
#[derive(Default)]
pub struct ScriptedNode {
    state: Mutex<NodeState>,
}

impl ScriptedNode {
    /// A node whose canonical chain is blocks `1..=to` on fork 0.
    pub fn with_chain(to: u64) -> Arc<Self> {
        let node = Arc::new(Self::default());
        node.extend(0, to);
        node
    }

    /// Make `block` canonical at its height, dropping anything above it.
    pub fn mine(&self, block: Block) {
        let mut state = self.state.lock().unwrap();
        let number = block.number;
        state.canonical.split_off(&number);
        state.canonical.insert(number, block.hash);
        state.by_hash.insert(block.hash, block);
    }

    /// Mine blocks on fork `tag` up to `to`, on top of the canonical head.
    pub fn extend(&self, tag: u8, to: u64) {
        let from = self.head_number().map_or(1, |n| n + 1);
        for n in from..=to {
            let parent = self.canonical_hash(n - 1).unwrap_or(h(tag, n - 1));
            self.mine(Block::new(n, h(tag, n), parent));
        }
    }

    /// Replace the canonical chain from `from` onwards with fork `tag`
    /// blocks `from..=to`.
    pub fn reorg(&self, from: u64, tag: u8, to: u64) {
        {
            let mut state = self.state.lock().unwrap();
            state.canonical.split_off(&from);
        }
        for n in from..=to {
            let parent = self.canonical_hash(n - 1).unwrap_or(h(tag, n - 1));
            self.mine(Block::new(n, h(tag, n), parent));
        }
    }

    /// Replace a mined block's contents, keeping its identity.
    pub fn update(&self, hash: B256, f: impl FnOnce(&mut Block)) {
        let mut state = self.state.lock().unwrap();
        if let Some(block) = state.by_hash.get_mut(&hash) {
            f(block);
        }
    }

    /// Serve `logs` for the block `hash`, and give it a non-zero bloom.
    pub fn set_logs(&self, hash: B256, logs: Vec<Log>) {
        self.update(hash, |b| b.logs_bloom = Bloom::repeat_byte(0xff));
        self.state.lock().unwrap().logs.insert(hash, logs);
    }

    /// Fail the next `n` log queries for `hash`.
    pub fn fail_logs(&self, hash: B256, n: u32) {
        self.state.lock().unwrap().log_failures.insert(hash, n);
    }

    /// Fail the next `n` block queries with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().failures = n;
    }

    /// Number of block queries served so far.
    pub fn block_calls(&self) -> u32 {
        self.state.lock().unwrap().block_calls
    }

    pub fn head_number(&self) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .canonical
            .last_key_value()
            .map(|(n, _)| *n)
    }

    pub fn canonical_hash(&self, number: u64) -> Option<B256> {
        self.state.lock().unwrap().canonical.get(&number).copied()
    }

    fn block_query(&self, find: impl FnOnce(&NodeState) -> Option<Block>) -> Result<Block, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.block_calls += 1;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(ClientError::transport("connection reset by peer"));
        }
        find(&state).ok_or(ClientError::NotFound)
    }
}

impl ChainClient for ScriptedNode {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        Ok(31337)
    }

    async fn block_by_number(&self, number: Option<u64>) -> Result<Block, ClientError> {
        self.block_query(|state| {
            let hash = match number {
                Some(n) => state.canonical.get(&n)?,
                None => state.canonical.last_key_value()?.1,
            };
            state.by_hash.get(hash).cloned()
        })
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Block, ClientError> {
        self.block_query(|state| state.by_hash.get(&hash).cloned())
    }

    async fn filter_logs(&self, block_hash: B256, _: &[B256]) -> Result<Vec<Log>, ClientError> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.log_failures.get_mut(&block_hash) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::transport("log query timed out"));
            }
        }
        Ok(state.logs.get(&block_hash).cloned().unwrap_or_default())
    }
}

/// Receive batches until `done` holds for the last one, failing after a
/// minute of (virtual) time.
pub async fn recv_until(sub: &mut Subscription, mut done: impl FnMut(&Blocks) -> bool) -> Vec<Blocks> {
    let mut batches = Vec::new();
    tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(batch) = sub.recv().await {
            let finished = done(&batch);
            batches.push(batch);
            if finished {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for batches");
    batches
}

/// Whether `batch` adds block `hash`.
pub fn adds(batch: &Blocks, hash: B256) -> bool {
    batch
        .iter()
        .any(|b| b.hash == hash && b.event == eth_head_monitor::BlockEvent::Added)
}
