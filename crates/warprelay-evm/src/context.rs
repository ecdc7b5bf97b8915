//! Per-chain state shared by the catch-up and live phases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use warprelay_core::backoff::Backoff;
use warprelay_core::checkpoint::CheckpointManager;
use warprelay_core::config::{ChainId, SubscriberConfig};
use warprelay_core::error::RelayerError;
use warprelay_core::state::SubscriberMetrics;
use warprelay_core::types::{EventFilter, RawLog, WarpLogEvent};

/// Lock-free counters behind [`SubscriberMetrics`] snapshots.
#[derive(Debug, Default)]
pub struct Metrics {
    events_emitted: AtomicU64,
    pages_scanned: AtomicU64,
    query_retries: AtomicU64,
    reconnections: AtomicU64,
    checkpoint_failures: AtomicU64,
    decode_errors: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> SubscriberMetrics {
        SubscriberMetrics {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
            query_retries: self.query_retries.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn page_scanned(&self) {
        self.pages_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn query_retried(&self) {
        self.query_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconnected(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything one chain's phases need: identity, tuning, the checkpoint,
/// the shared output channel and the shutdown token.
pub struct ChainContext {
    pub chain_id: ChainId,
    pub filter: EventFilter,
    pub config: SubscriberConfig,
    pub backoff: Backoff,
    pub checkpoint: CheckpointManager,
    pub output: mpsc::Sender<WarpLogEvent>,
    pub cancel: CancellationToken,
    pub metrics: Arc<Metrics>,
}

impl ChainContext {
    /// Hand an event to the output channel, waiting for capacity.
    ///
    /// Returns `Cancelled` when shutdown fires first or when the receiving
    /// side has gone away.
    pub async fn emit(&self, event: WarpLogEvent) -> Result<(), RelayerError> {
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RelayerError::Cancelled),
            sent = self.output.send(event) => sent,
        };
        if sent.is_err() {
            warn!(chain = %self.chain_id, "output channel closed");
            return Err(RelayerError::Cancelled);
        }
        self.metrics.events_emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Durably advance the checkpoint to `height`.
    pub async fn commit(&mut self, height: u64) -> Result<(), RelayerError> {
        let failures_before = self.checkpoint.failures();
        let result = self.checkpoint.commit(height, &self.cancel).await;
        let failed = self.checkpoint.failures() - failures_before;
        if failed > 0 {
            self.metrics.checkpoint_failures.fetch_add(failed, Ordering::Relaxed);
        }
        result
    }

    /// Decode a log into an event. Removed logs and logs outside the filter
    /// yield `None`; undecodable logs are logged, counted and skipped.
    pub fn decode(&self, log: &RawLog) -> Option<WarpLogEvent> {
        if log.is_removed() || !self.filter.matches(log) {
            return None;
        }
        match WarpLogEvent::from_raw(&self.chain_id, log) {
            Ok(event) => Some(event),
            Err(e) => {
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    chain = %self.chain_id,
                    tx = %log.tx_hash,
                    error = %e,
                    "skipping undecodable warp log"
                );
                None
            }
        }
    }
}
