//! Subscriber orchestrator: drives one source chain through its lifecycle.
//!
//! # Initializing
//! Validate the chain configuration and load the checkpoint. A configuration
//! error fails this chain only.
//!
//! # CatchingUp
//! Dial, open the log subscription (buffered, not yet read), then catch up
//! from `checkpoint + 1` to a fresh head snapshot. Subscribing first means
//! every block after the snapshot is already covered by the subscription.
//!
//! # Live
//! Follow the subscription until it ends. Logs below the start height are
//! dropped even when catch-up had nothing to scan.
//!
//! # Reconnecting
//! Wait out the backoff, re-dial, re-subscribe and run exactly one
//! gap-closing catch-up pass before going live again. Failures here loop
//! back with a longer delay; only shutdown ends the cycle.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use warprelay_core::backoff::Backoff;
use warprelay_core::checkpoint::{CheckpointManager, CheckpointStore};
use warprelay_core::client::{Dialer, LogStream};
use warprelay_core::config::{SourceChainConfig, SubscriberConfig};
use warprelay_core::error::RelayerError;
use warprelay_core::state::{SubscriberMetrics, SubscriberState};
use warprelay_core::types::{EventFilter, WarpLogEvent};

use crate::context::{ChainContext, Metrics};
use crate::live::LiveFollower;
use crate::scanner::CatchUp;

/// Read-only view of a running subscriber.
#[derive(Clone)]
pub struct SubscriberHandle {
    state: watch::Receiver<SubscriberState>,
    metrics: Arc<Metrics>,
}

impl SubscriberHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Counters snapshot.
    pub fn metrics(&self) -> SubscriberMetrics {
        self.metrics.snapshot()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SubscriberState> {
        self.state.clone()
    }

    /// Wait until `pred` holds for the current state. Returns the matching
    /// state, or `None` if the subscriber was dropped first.
    pub async fn wait_for(&self, pred: impl FnMut(&SubscriberState) -> bool) -> Option<SubscriberState> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(pred).await.ok().map(|s| *s);
        state
    }
}

/// Watches one source chain and feeds its warp events into `output`.
pub struct Subscriber {
    source: SourceChainConfig,
    config: SubscriberConfig,
    filter: EventFilter,
    dialer: Arc<dyn Dialer>,
    store: Arc<dyn CheckpointStore>,
    output: mpsc::Sender<WarpLogEvent>,
    state: watch::Sender<SubscriberState>,
    metrics: Arc<Metrics>,
}

impl Subscriber {
    pub fn new(
        source: SourceChainConfig,
        config: SubscriberConfig,
        dialer: Arc<dyn Dialer>,
        store: Arc<dyn CheckpointStore>,
        output: mpsc::Sender<WarpLogEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriberState::Initializing);
        Self {
            source,
            config,
            filter: EventFilter::warp(),
            dialer,
            store,
            output,
            state,
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Replace the default warp filter.
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn source(&self) -> &SourceChainConfig {
        &self.source
    }

    pub fn handle(&self) -> SubscriberHandle {
        SubscriberHandle {
            state: self.state.subscribe(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    fn set_state(&self, state: SubscriberState) {
        self.state.send_replace(state);
        info!(chain = %self.source.chain_id, %state, "subscriber state");
    }

    /// Run until `cancel` fires (→ `Ok`, state `Stopped`) or a configuration
    /// error occurs (→ `Err`, state `Failed`).
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayerError> {
        self.set_state(SubscriberState::Initializing);

        let mut ctx = match self.initialize(&cancel).await {
            Ok(ctx) => ctx,
            Err(RelayerError::Cancelled) => {
                self.set_state(SubscriberState::Stopped);
                return Ok(());
            }
            Err(e) => {
                error!(chain = %self.source.chain_id, error = %e, "subscriber failed to initialize");
                self.set_state(SubscriberState::Failed);
                return Err(e);
            }
        };

        let mut attempt = 0u32;
        loop {
            if attempt == 0 {
                self.set_state(SubscriberState::CatchingUp);
            } else {
                self.set_state(SubscriberState::Reconnecting);
                self.metrics.reconnected();
                let delay = ctx.backoff.next_delay(attempt);
                info!(
                    chain = %ctx.chain_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "reconnecting"
                );
                let cancelled = tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    break;
                }
            }

            let stream = match self.connect_and_catch_up(&mut ctx).await {
                Ok(stream) => stream,
                Err(RelayerError::Cancelled) => break,
                Err(e) if e.is_config() => {
                    error!(chain = %ctx.chain_id, error = %e, "invalid chain configuration");
                    self.set_state(SubscriberState::Failed);
                    return Err(e);
                }
                Err(e) => {
                    warn!(chain = %ctx.chain_id, attempt, error = %e, "connection attempt failed");
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            self.set_state(SubscriberState::Live);
            let mut live = LiveFollower::new(&mut ctx, self.default_start());
            let result = live.run(stream).await;
            let received = live.received();
            match result {
                Err(RelayerError::Cancelled) => break,
                Err(e) => warn!(chain = %ctx.chain_id, received, error = %e, "live subscription ended"),
                Ok(()) => warn!(chain = %ctx.chain_id, received, "live subscription ended"),
            }
            // A subscription that dies before delivering anything keeps
            // growing the delay.
            attempt = if received > 0 { 1 } else { attempt.saturating_add(1) };
        }

        info!(chain = %ctx.chain_id, committed = ?ctx.checkpoint.committed(), "subscriber stopped");
        self.set_state(SubscriberState::Stopped);
        Ok(())
    }

    async fn initialize(&self, cancel: &CancellationToken) -> Result<ChainContext, RelayerError> {
        let chain_id = self.source.validate()?;
        if self.config.max_blocks_per_request == 0 {
            return Err(RelayerError::Config("max-blocks-per-request must be positive".into()));
        }

        let backoff = Backoff::new(self.config.backoff.clone());
        let mut checkpoint = CheckpointManager::new(Arc::clone(&self.store), chain_id.clone(), backoff.clone());

        let mut attempt = 0u32;
        loop {
            match checkpoint.load().await {
                Ok(height) => {
                    info!(
                        chain = %chain_id,
                        checkpoint = ?height,
                        start = checkpoint.next_height(self.default_start()),
                        "loaded checkpoint"
                    );
                    break;
                }
                Err(e) if e.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    warn!(chain = %chain_id, attempt, error = %e, "checkpoint load failed, retrying");
                    backoff.wait(attempt, cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ChainContext {
            chain_id,
            filter: self.filter.clone(),
            config: self.config.clone(),
            backoff,
            checkpoint,
            output: self.output.clone(),
            cancel: cancel.clone(),
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Height to start from when the chain has no checkpoint.
    fn default_start(&self) -> u64 {
        self.source
            .start_block_height
            .unwrap_or(self.config.genesis_height)
    }

    async fn connect_and_catch_up(&self, ctx: &mut ChainContext) -> Result<LogStream, RelayerError> {
        let client = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RelayerError::Cancelled),
            r = self.dialer.dial(&self.source) => r?,
        };
        let stream = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RelayerError::Cancelled),
            r = client.subscribe_logs(&ctx.filter) => r?,
        };

        let start = ctx.checkpoint.next_height(self.default_start());
        CatchUp::new(client.as_ref(), ctx).process_from_height(start).await?;
        Ok(stream)
    }
}
