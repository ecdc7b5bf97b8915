//! Catch-up scanner tests against a scripted node.

mod common;

use std::sync::Arc;

use warprelay_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use warprelay_core::error::RelayerError;
use warprelay_core::types::BlockRange;
use warprelay_evm::scanner::CatchUp;
use warprelay_storage::JsonFileStorage;

use common::{chain_id, context, drain, expected_ranges, warp_log, Fail, MockChain};

const N: u64 = 200;

async fn scan(latest: u64, start: u64) -> Arc<MockChain> {
    let chain = MockChain::new(latest);
    let store = Arc::new(MemoryCheckpointStore::new());
    let (mut ctx, _rx) = context(store.clone(), N, 1024).await;

    let report = CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(start)
        .await
        .unwrap();
    assert_eq!(report.head, latest);
    chain
}

#[tokio::test]
async fn tiles_range_from_800_to_1000() {
    let chain = scan(1000, 800).await;
    assert_eq!(chain.ranges(), vec![BlockRange::new(800, 1000).unwrap()]);
    assert_eq!(chain.height_calls(), 1);
}

#[tokio::test]
async fn tiles_range_from_700_to_1000() {
    let chain = scan(1000, 700).await;
    assert_eq!(
        chain.ranges(),
        vec![
            BlockRange::new(700, 900).unwrap(),
            BlockRange::new(901, 1000).unwrap(),
        ]
    );
    assert_eq!(chain.height_calls(), 1);
}

#[tokio::test]
async fn tiles_range_from_751_to_19642() {
    let chain = scan(19642, 751).await;
    let ranges = chain.ranges();
    assert_eq!(ranges, expected_ranges(751, 19642, N));
    assert_eq!(ranges.len(), 94);
    assert_eq!(ranges.last(), Some(&BlockRange::new(19444, 19642).unwrap()));
    assert!(ranges.iter().all(|r| r.to - r.from <= N));
    assert_eq!(chain.height_calls(), 1);
}

#[tokio::test]
async fn tiles_range_from_41_to_96() {
    let chain = scan(96, 41).await;
    assert_eq!(chain.ranges(), vec![BlockRange::new(41, 96).unwrap()]);
    assert_eq!(chain.height_calls(), 1);
}

#[tokio::test]
async fn query_count_matches_page_arithmetic() {
    for (checkpoint, head) in [(0u64, 1u64), (799, 1000), (699, 1000), (750, 19642), (40, 96), (0, 201), (0, 202)] {
        let chain = scan(head, checkpoint + 1).await;
        let expected = (head - checkpoint).div_ceil(N + 1);
        assert_eq!(chain.ranges().len() as u64, expected, "checkpoint {checkpoint}, head {head}");
    }
}

#[tokio::test]
async fn caught_up_chain_issues_no_queries() {
    let chain = MockChain::new(1000);
    let store = Arc::new(MemoryCheckpointStore::new().with_height(chain_id(), 1000));
    let (mut ctx, _rx) = context(store.clone(), N, 16).await;

    let start = ctx.checkpoint.next_height(0);
    let report = CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(start)
        .await
        .unwrap();

    assert_eq!(report.pages, 0);
    assert!(chain.ranges().is_empty());
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(1000));
}

#[tokio::test]
async fn emits_in_order_then_checkpoints_head() {
    let chain = MockChain::new(1000);
    chain.add_logs([warp_log(950, 1), warp_log(705, 0), warp_log(950, 0), warp_log(1000, 3)]);
    let store = Arc::new(MemoryCheckpointStore::new().with_height(chain_id(), 699));
    let (mut ctx, mut rx) = context(store.clone(), N, 16).await;

    let report = CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(700)
        .await
        .unwrap();

    let events = drain(&mut rx);
    let positions: Vec<_> = events.iter().map(|e| (e.block_height, e.log_index)).collect();
    assert_eq!(positions, vec![(705, 0), (950, 0), (950, 1), (1000, 3)]);
    assert!(events.iter().all(|e| e.chain_id == chain_id()));
    assert_eq!(report.events, 4);
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(1000));
    assert_eq!(ctx.metrics.snapshot().events_emitted, 4);
    assert_eq!(ctx.metrics.snapshot().pages_scanned, 2);
}

#[tokio::test]
async fn undecodable_logs_are_skipped() {
    let chain = MockChain::new(100);
    let mut broken = warp_log(50, 0);
    broken.topics.truncate(1);
    let mut foreign = warp_log(60, 0);
    foreign.address = "0x1111111111111111111111111111111111111111".into();
    chain.add_logs([broken, foreign, warp_log(70, 0)]);
    let store = Arc::new(MemoryCheckpointStore::new());
    let (mut ctx, mut rx) = context(store.clone(), N, 16).await;

    CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(0)
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].block_height, 70);
    assert_eq!(ctx.metrics.snapshot().decode_errors, 1);
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(100));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried() {
    let chain = MockChain::new(1000);
    chain.add_logs([warp_log(900, 0)]);
    chain.fail_next([Fail::Transient, Fail::Transient]);
    let store = Arc::new(MemoryCheckpointStore::new());
    let (mut ctx, mut rx) = context(store.clone(), N, 16).await;

    CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(800)
        .await
        .unwrap();

    let page = BlockRange::new(800, 1000).unwrap();
    assert_eq!(chain.ranges(), vec![page, page, page]);
    assert_eq!(drain(&mut rx).len(), 1);
    assert_eq!(ctx.metrics.snapshot().query_retries, 2);
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(1000));
}

#[tokio::test]
async fn rejected_range_is_split_once() {
    let chain = MockChain::new(1000);
    chain.reject_wider_than(100);
    chain.add_logs([warp_log(850, 0), warp_log(950, 0)]);
    let store = Arc::new(MemoryCheckpointStore::new());
    let (mut ctx, mut rx) = context(store.clone(), N, 16).await;

    CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(800)
        .await
        .unwrap();

    assert_eq!(
        chain.ranges(),
        vec![
            BlockRange::new(800, 1000).unwrap(),
            BlockRange::new(800, 900).unwrap(),
            BlockRange::new(901, 1000).unwrap(),
        ]
    );
    let heights: Vec<_> = drain(&mut rx).iter().map(|e| e.block_height).collect();
    assert_eq!(heights, vec![850, 950]);
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(1000));
}

#[tokio::test]
async fn second_rejection_is_surfaced() {
    let chain = MockChain::new(1000);
    chain.reject_wider_than(50);
    chain.add_logs([warp_log(850, 0)]);
    let store = Arc::new(MemoryCheckpointStore::new());
    let (mut ctx, mut rx) = context(store.clone(), N, 16).await;

    let err = CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(800)
        .await
        .unwrap_err();

    assert!(matches!(err, RelayerError::RejectedRange { from: 800, to: 900, .. }));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), None);
}

#[tokio::test]
async fn restart_resumes_after_last_committed_page() {
    let dir = tempfile::tempdir().unwrap();
    let chain = MockChain::new(19642);
    chain.add_logs([warp_log(800, 0), warp_log(1000, 0), warp_log(1200, 0)]);
    // Third page fails hard: the process "crashes" after two commits.
    chain.fail_at(1153, Fail::Fatal);

    {
        let store = Arc::new(JsonFileStorage::open(dir.path()).await.unwrap());
        let (mut ctx, mut rx) = context(store, N, 16).await;
        let err = CatchUp::new(chain.as_ref(), &mut ctx)
            .process_from_height(751)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    let store = Arc::new(JsonFileStorage::open(dir.path()).await.unwrap());
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(1152));

    let restarted = MockChain::new(19642);
    restarted.add_logs([warp_log(800, 0), warp_log(1000, 0), warp_log(1200, 0)]);
    let (mut ctx, mut rx) = context(store.clone(), N, 16).await;
    let start = ctx.checkpoint.next_height(751);
    assert_eq!(start, 1153);

    CatchUp::new(restarted.as_ref(), &mut ctx)
        .process_from_height(start)
        .await
        .unwrap();

    assert_eq!(restarted.ranges(), expected_ranges(1153, 19642, N));
    let heights: Vec<_> = drain(&mut rx).iter().map(|e| e.block_height).collect();
    assert_eq!(heights, vec![1200]);
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(19642));
}

#[tokio::test]
async fn full_channel_suspends_without_loss() {
    let chain = MockChain::new(1000);
    chain.add_logs((0..5).map(|i| warp_log(900, i)));
    let store = Arc::new(MemoryCheckpointStore::new());
    let (ctx, mut rx) = context(store.clone(), N, 1).await;

    let scanner_chain = chain.clone();
    let task = tokio::spawn(async move {
        let mut ctx = ctx;
        CatchUp::new(scanner_chain.as_ref(), &mut ctx)
            .process_from_height(800)
            .await
    });

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(!task.is_finished());
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), None);

    let mut indices = Vec::new();
    for _ in 0..5 {
        indices.push(rx.recv().await.unwrap().log_index);
    }
    let report = task.await.unwrap().unwrap();

    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(report.events, 5);
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), Some(1000));
}

#[tokio::test]
async fn cancellation_stops_between_pages() {
    let chain = MockChain::new(1000);
    let store = Arc::new(MemoryCheckpointStore::new());
    let (mut ctx, _rx) = context(store.clone(), N, 16).await;
    ctx.cancel.cancel();

    let err = CatchUp::new(chain.as_ref(), &mut ctx)
        .process_from_height(0)
        .await
        .unwrap_err();

    assert!(matches!(err, RelayerError::Cancelled));
    assert_eq!(store.get_height(&chain_id()).await.unwrap(), None);
}
