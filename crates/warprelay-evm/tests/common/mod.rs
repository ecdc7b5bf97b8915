//! Scripted in-memory node and dialer shared by the engine tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use warprelay_core::backoff::{Backoff, BackoffConfig};
use warprelay_core::checkpoint::{CheckpointManager, CheckpointStore};
use warprelay_core::client::{ChainClient, Dialer, LogStream};
use warprelay_core::config::{ChainId, SourceChainConfig, SubscriberConfig};
use warprelay_core::error::RelayerError;
use warprelay_core::types::{event_topic, BlockRange, EventFilter, RawLog, WarpLogEvent};
use warprelay_core::types::{SEND_WARP_MESSAGE_SIGNATURE, WARP_PRECOMPILE_ADDRESS};
use warprelay_evm::context::{ChainContext, Metrics};

pub fn chain_id() -> ChainId {
    ChainId::from_bytes([7; 32])
}

pub fn source() -> SourceChainConfig {
    SourceChainConfig {
        subnet_id: "2TGBXcnwx5PqiXWiqxAKUaNSqDguXNh1mxnp82jui68hxJSZAx".into(),
        chain_id: chain_id().to_string(),
        vm: "evm".into(),
        api_node_host: "127.0.0.1".into(),
        api_node_port: 9650,
        encrypt_connection: false,
        rpc_endpoint: None,
        ws_endpoint: None,
        start_block_height: None,
    }
}

pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_ms: 10,
        max_ms: 100,
        multiplier: 2.0,
        jitter: 0.0,
    }
}

pub fn subscriber_config(max_blocks_per_request: u64) -> SubscriberConfig {
    SubscriberConfig {
        max_blocks_per_request,
        genesis_height: 0,
        backoff: fast_backoff(),
    }
}

/// A `SendWarpMessage` log at `block`, `index`.
pub fn warp_log(block: u64, index: u32) -> RawLog {
    RawLog {
        address: WARP_PRECOMPILE_ADDRESS.into(),
        topics: vec![
            event_topic(SEND_WARP_MESSAGE_SIGNATURE),
            format!("0x{:0>64}", "8db97c7cece249c2b98bdc0226cc4c2a57bf52fc"),
            format!("0x{:064x}", block * 1_000 + index as u64),
        ],
        data: "0x00".into(),
        block_number: format!("{block:#x}"),
        block_hash: format!("0x{block:064x}"),
        tx_hash: format!("0x{:064x}", block * 1_000 + index as u64),
        log_index: format!("{index:#x}"),
        removed: None,
    }
}

/// Scripted failure for the next `filter_logs` call.
#[derive(Debug, Clone, Copy)]
pub enum Fail {
    Transient,
    Rejected,
    Fatal,
}

impl Fail {
    fn into_error(self, range: BlockRange) -> RelayerError {
        match self {
            Fail::Transient => RelayerError::TransientQuery("connection reset".into()),
            Fail::Rejected => RelayerError::RejectedRange {
                from: range.from,
                to: range.to,
                reason: "block range too large".into(),
            },
            Fail::Fatal => RelayerError::Other("node returned garbage".into()),
        }
    }
}

type Feed = mpsc::UnboundedSender<Result<RawLog, RelayerError>>;

/// In-memory node. `filter_logs` answers from `logs`; `subscribe_logs`
/// hands out a feed the test pushes into.
#[derive(Default)]
pub struct MockChain {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    /// Every `filter_logs` range, in call order.
    ranges: Mutex<Vec<BlockRange>>,
    /// `"subscribe"`, `"height"` and `"logs"` in call order.
    calls: Mutex<Vec<&'static str>>,
    height_calls: AtomicUsize,
    failures: Mutex<VecDeque<Fail>>,
    /// Fail `filter_logs` on ranges starting at this height.
    fail_at: Mutex<Option<(u64, Fail)>>,
    /// Reject ranges with `to - from` above this.
    max_width: Mutex<Option<u64>>,
    feed: Mutex<Option<Feed>>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_logs(&self, logs: impl IntoIterator<Item = RawLog>) {
        self.logs.lock().unwrap().extend(logs);
    }

    pub fn fail_next(&self, fails: impl IntoIterator<Item = Fail>) {
        self.failures.lock().unwrap().extend(fails);
    }

    pub fn fail_at(&self, from: u64, fail: Fail) {
        *self.fail_at.lock().unwrap() = Some((from, fail));
    }

    pub fn reject_wider_than(&self, width: u64) {
        *self.max_width.lock().unwrap() = Some(width);
    }

    pub fn ranges(&self) -> Vec<BlockRange> {
        self.ranges.lock().unwrap().clone()
    }

    pub fn take_ranges(&self) -> Vec<BlockRange> {
        std::mem::take(&mut *self.ranges.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn height_calls(&self) -> usize {
        self.height_calls.load(Ordering::SeqCst)
    }

    pub fn has_subscriber(&self) -> bool {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|feed| !feed.is_closed())
    }

    /// Mine `log` and deliver it to the open subscription.
    pub fn push_live(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log.clone());
        if let Some(feed) = self.feed.lock().unwrap().as_ref() {
            let _ = feed.send(Ok(log));
        }
    }

    /// Drop the open subscription with an error.
    pub fn disconnect(&self) {
        if let Some(feed) = self.feed.lock().unwrap().take() {
            let _ = feed.send(Err(RelayerError::StreamClosed("connection reset".into())));
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_height(&self) -> Result<u64, RelayerError> {
        self.calls.lock().unwrap().push("height");
        self.height_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn filter_logs(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> Result<Vec<RawLog>, RelayerError> {
        assert_eq!(filter, &EventFilter::warp());
        self.calls.lock().unwrap().push("logs");
        self.ranges.lock().unwrap().push(range);

        if let Some(fail) = self.failures.lock().unwrap().pop_front() {
            return Err(fail.into_error(range));
        }
        if let Some((from, fail)) = *self.fail_at.lock().unwrap() {
            if range.from == from {
                return Err(fail.into_error(range));
            }
        }
        if let Some(width) = *self.max_width.lock().unwrap() {
            if range.to - range.from > width {
                return Err(Fail::Rejected.into_error(range));
            }
        }

        let mut logs: Vec<RawLog> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| range.contains(log.block_number_u64().unwrap()))
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number_u64().unwrap(), log.log_index_u32().unwrap()));
        Ok(logs)
    }

    async fn subscribe_logs(&self, _filter: &EventFilter) -> Result<LogStream, RelayerError> {
        self.calls.lock().unwrap().push("subscribe");
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap() = Some(tx);
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

/// Dialer handing out the same `MockChain`, optionally failing first.
pub struct MockDialer {
    chain: Arc<MockChain>,
    dials: AtomicUsize,
    failures: Mutex<VecDeque<RelayerError>>,
}

impl MockDialer {
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            dials: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
        })
    }

    pub fn fail_next(&self, error: RelayerError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _source: &SourceChainConfig) -> Result<Arc<dyn ChainClient>, RelayerError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        let client: Arc<dyn ChainClient> = self.chain.clone();
        Ok(client)
    }
}

/// A loaded chain context over `store` with an output channel of `capacity`.
pub async fn context(
    store: Arc<dyn CheckpointStore>,
    max_blocks_per_request: u64,
    capacity: usize,
) -> (ChainContext, mpsc::Receiver<WarpLogEvent>) {
    let backoff = Backoff::new(fast_backoff());
    let mut checkpoint = CheckpointManager::new(store, chain_id(), backoff.clone());
    checkpoint.load().await.unwrap();
    let (output, rx) = mpsc::channel(capacity);
    let ctx = ChainContext {
        chain_id: chain_id(),
        filter: EventFilter::warp(),
        config: subscriber_config(max_blocks_per_request),
        backoff,
        checkpoint,
        output,
        cancel: CancellationToken::new(),
        metrics: Arc::new(Metrics::default()),
    };
    (ctx, rx)
}

/// Pages `[i, min(i + n, latest)]` for `i` stepping by `n + 1` from `start`.
pub fn expected_ranges(start: u64, latest: u64, n: u64) -> Vec<BlockRange> {
    (start..=latest)
        .step_by((n + 1) as usize)
        .map(|i| BlockRange::new(i, (i + n).min(latest)).unwrap())
        .collect()
}

pub fn drain(rx: &mut mpsc::Receiver<WarpLogEvent>) -> Vec<WarpLogEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
