//! End-to-end tests of the monitor against a scripted node.
//!
//! All tests run on tokio's paused clock, so polling intervals, retry
//! backoff and reorg pauses cost no wall time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use common::{adds, h, recv_until, ScriptedNode};
use eth_head_monitor::block::BlocksExt;
use eth_head_monitor::monitor::MonitorState;
use eth_head_monitor::{BlockEvent, Monitor, MonitorError, MonitorOptions, MonitorResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn options() -> MonitorOptions {
    MonitorOptions {
        polling_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(1),
        start_block: Some(1),
        block_retention_limit: 16,
        ..MonitorOptions::default()
    }
}

fn start(
    node: &Arc<ScriptedNode>,
    options: MonitorOptions,
) -> (Arc<Monitor<ScriptedNode>>, JoinHandle<MonitorResult<()>>) {
    let monitor = Arc::new(Monitor::with_shared_client(Arc::clone(node), options).unwrap());
    let handle = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.run(CancellationToken::new()).await }
    });
    (monitor, handle)
}

fn numbers(batches: &[Vec<eth_head_monitor::Block>]) -> Vec<(BlockEvent, u64)> {
    batches
        .iter()
        .flatten()
        .map(|b| (b.event, b.number))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_follows_chain_extension() {
    let node = ScriptedNode::with_chain(5);
    let (monitor, handle) = start(&node, options());
    let mut sub = monitor.subscribe();

    let batches = recv_until(&mut sub, |b| adds(b, h(0, 5))).await;
    let expected: Vec<_> = (1..=5).map(|n| (BlockEvent::Added, n)).collect();
    assert_eq!(numbers(&batches), expected);
    assert!(batches.iter().all(|b| b.is_ok()));

    node.extend(0, 7);
    let batches = recv_until(&mut sub, |b| adds(b, h(0, 7))).await;
    assert_eq!(
        numbers(&batches),
        vec![(BlockEvent::Added, 6), (BlockEvent::Added, 7)]
    );

    let snapshot = monitor.chain_snapshot();
    assert_eq!(snapshot.len(), 7);
    assert_eq!(monitor.latest_block().map(|b| b.hash), Some(h(0, 7)));
    assert_eq!(monitor.block_by_number(3).map(|b| b.hash), Some(h(0, 3)));

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_publishes_reorg_as_removals_then_additions() {
    let node = ScriptedNode::with_chain(5);
    let (monitor, handle) = start(&node, options());
    let mut sub = monitor.subscribe();
    recv_until(&mut sub, |b| adds(b, h(0, 5))).await;

    // 4' and 5' replace 4 and 5, then 6' extends the new branch
    node.reorg(4, 1, 6);

    let batches = recv_until(&mut sub, |b| adds(b, h(1, 6))).await;
    let reorg = batches.last().unwrap();
    let summary: Vec<_> = reorg.iter().map(|b| (b.event, b.hash)).collect();
    assert_eq!(
        summary,
        vec![
            (BlockEvent::Removed, h(0, 5)),
            (BlockEvent::Removed, h(0, 4)),
            (BlockEvent::Added, h(1, 4)),
            (BlockEvent::Added, h(1, 5)),
            (BlockEvent::Added, h(1, 6)),
        ]
    );
    assert!(reorg.has_reorg());

    let hashes: Vec<B256> = monitor.chain_snapshot().iter().map(|b| b.hash).collect();
    assert_eq!(
        hashes,
        vec![h(0, 1), h(0, 2), h(0, 3), h(1, 4), h(1, 5), h(1, 6)]
    );
    assert!(monitor.block(h(0, 5)).is_none());

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_trailing_holds_events_behind_head() {
    let node = ScriptedNode::with_chain(6);
    let (monitor, handle) = start(
        &node,
        MonitorOptions {
            trail_num_blocks_behind_head: 2,
            ..options()
        },
    );
    let mut sub = monitor.subscribe();

    let batches = recv_until(&mut sub, |b| adds(b, h(0, 4))).await;
    let expected: Vec<_> = (1..=4).map(|n| (BlockEvent::Added, n)).collect();
    assert_eq!(numbers(&batches), expected);

    // Head is 6, nothing above 4 may be released
    let held = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await;
    assert!(held.is_err());
    assert_eq!(monitor.latest_block().map(|b| b.number), Some(6));

    node.extend(0, 8);
    let batches = recv_until(&mut sub, |b| adds(b, h(0, 6))).await;
    assert_eq!(
        numbers(&batches),
        vec![(BlockEvent::Added, 5), (BlockEvent::Added, 6)]
    );

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_trailing_hides_reverted_blocks() {
    let node = ScriptedNode::with_chain(5);
    let (monitor, handle) = start(
        &node,
        MonitorOptions {
            trail_num_blocks_behind_head: 3,
            ..options()
        },
    );
    let mut sub = monitor.subscribe();
    recv_until(&mut sub, |b| adds(b, h(0, 2))).await;

    // Block 5 was never released; a reorg replacing it must not surface it
    node.reorg(5, 1, 9);
    let batches = recv_until(&mut sub, |b| adds(b, h(1, 5))).await;

    let all: Vec<_> = batches.iter().flatten().collect();
    assert!(all.iter().all(|b| b.hash != h(0, 5)));
    assert!(all.iter().all(|b| b.event == BlockEvent::Added));

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_slow_subscriber_does_not_stall_others() {
    let node = ScriptedNode::with_chain(50);
    let (monitor, handle) = start(
        &node,
        MonitorOptions {
            block_retention_limit: 64,
            ..options()
        },
    );
    let mut slow = monitor.subscribe();
    let mut fast = monitor.subscribe();

    let batches = recv_until(&mut fast, |b| adds(b, h(0, 50))).await;
    assert_eq!(numbers(&batches).len(), 50);

    // The slow subscriber buffered everything, in order
    let batches = recv_until(&mut slow, |b| adds(b, h(0, 50))).await;
    let expected: Vec<_> = (1..=50).map(|n| (BlockEvent::Added, n)).collect();
    assert_eq!(numbers(&batches), expected);

    slow.unsubscribe();
    assert!(slow.recv().await.is_none());

    node.extend(0, 51);
    recv_until(&mut fast, |b| adds(b, h(0, 51))).await;

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_recovers_from_transport_errors() {
    let node = ScriptedNode::with_chain(3);
    node.fail_next(25);
    let (monitor, handle) = start(&node, options());
    let mut sub = monitor.subscribe();

    let batches = recv_until(&mut sub, |b| adds(b, h(0, 3))).await;
    assert_eq!(numbers(&batches).len(), 3);
    assert!(node.block_calls() > 25);

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_trailing_release_carries_backfilled_logs() {
    let node = ScriptedNode::with_chain(5);
    node.set_logs(h(0, 2), vec![Log::default(), Log::default()]);
    node.set_logs(h(0, 3), vec![Log::default()]);
    // Attach and the same-cycle backfill both fail for block 3
    node.fail_logs(h(0, 3), 2);
    let (monitor, handle) = start(
        &node,
        MonitorOptions {
            with_logs: true,
            trail_num_blocks_behind_head: 2,
            ..options()
        },
    );
    let mut sub = monitor.subscribe();

    let batches = recv_until(&mut sub, |b| adds(b, h(0, 3))).await;
    let blocks: Vec<_> = batches.into_iter().flatten().collect();
    assert_eq!(blocks.len(), 3);

    // Zero bloom settles without logs
    assert!(blocks[0].ok);
    assert_eq!(blocks[0].logs.as_ref().map(Vec::len), Some(0));
    assert_eq!(blocks[1].logs.as_ref().map(Vec::len), Some(2));
    // Block 3 was held back unsettled and healed by a later backfill
    assert!(blocks[2].ok);
    assert_eq!(blocks[2].logs.as_ref().map(Vec::len), Some(1));
    assert_eq!(monitor.block(h(0, 3)), Some(blocks[2].clone()));

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_resumes_from_head() {
    let node = ScriptedNode::with_chain(3);
    let monitor = Arc::new(Monitor::with_shared_client(Arc::clone(&node), options()).unwrap());
    let mut sub = monitor.subscribe();

    let ctx = CancellationToken::new();
    let handle = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        let ctx = ctx.clone();
        async move { monitor.run(ctx).await }
    });
    recv_until(&mut sub, |b| adds(b, h(0, 3))).await;

    ctx.cancel();
    assert!(handle.await.unwrap().is_ok());
    assert_eq!(monitor.state(), MonitorState::Idle);
    assert!(!sub.is_closed());

    node.extend(0, 5);
    let handle = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.run(CancellationToken::new()).await }
    });
    let batches = recv_until(&mut sub, |b| adds(b, h(0, 5))).await;
    assert_eq!(
        numbers(&batches),
        vec![(BlockEvent::Added, 4), (BlockEvent::Added, 5)]
    );

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_transaction_lookup() {
    let node = ScriptedNode::with_chain(2);
    let tx = B256::repeat_byte(0xee);
    node.update(h(0, 2), |b| b.transactions = vec![B256::ZERO, tx]);
    let (monitor, handle) = start(&node, options());
    let mut sub = monitor.subscribe();
    recv_until(&mut sub, |b| adds(b, h(0, 2))).await;

    let location = monitor.transaction(tx).unwrap();
    assert_eq!(location.block_number, 2);
    assert_eq!(location.block_hash, h(0, 2));
    assert_eq!(location.index, 1);
    assert!(monitor.transaction(B256::repeat_byte(0xdd)).is_none());

    monitor.stop();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_queue_overflow_is_fatal() {
    let node = ScriptedNode::with_chain(3);
    let (monitor, handle) = start(
        &node,
        MonitorOptions {
            block_retention_limit: 3,
            ..options()
        },
    );
    let mut sub = monitor.subscribe();
    recv_until(&mut sub, |b| adds(b, h(0, 3))).await;

    // A reorg deeper than the whole window: 3 removals + 4 additions
    // exceed the queue capacity of 6
    node.reorg(1, 1, 4);

    let result = handle.await.unwrap();
    assert!(matches!(
        result,
        Err(MonitorError::QueueFull { capacity: 6, .. })
    ));
    assert_eq!(monitor.state(), MonitorState::Idle);
    assert!(!monitor.is_running());

    monitor.stop();
    assert!(matches!(
        monitor.run(CancellationToken::new()).await,
        Err(MonitorError::Stopped)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_run_and_subscriptions() {
    let node = ScriptedNode::with_chain(1);
    let (monitor, handle) = start(&node, options());
    let mut sub = monitor.subscribe();
    recv_until(&mut sub, |b| adds(b, h(0, 1))).await;
    assert!(monitor.is_running());

    monitor.stop();

    assert!(handle.await.unwrap().is_ok());
    assert!(sub.recv().await.is_none());
    assert!(sub.is_closed());
    assert_eq!(monitor.state(), MonitorState::Stopped);
}
