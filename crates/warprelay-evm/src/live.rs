//! Live phase: follows the chain through the log subscription.
//!
//! The subscription carries no block boundaries, so the highest block seen is
//! only committed once a log from a later block arrives. On a quiet chain the
//! durable checkpoint stays at the previous block with logs, and a restart
//! re-delivers that block through the gap pass. Committing it on stream end
//! instead could drop logs of that block still in flight.

use futures::StreamExt;
use tracing::{debug, trace, warn};

use warprelay_core::client::LogStream;
use warprelay_core::error::RelayerError;

use crate::context::ChainContext;

/// Consumes a log subscription until it ends or shutdown is requested.
///
/// The checkpoint advances per block: a block is committed once a log from a
/// higher block arrives, so a block is never marked done while more of its
/// logs may still be in flight. Logs at or below the committed height were
/// already handed off by catch-up and are dropped, as are logs below the
/// start height of a chain without a checkpoint.
pub struct LiveFollower<'a> {
    ctx: &'a mut ChainContext,
    start: u64,
    received: u64,
}

impl<'a> LiveFollower<'a> {
    /// `start` is the first height to deliver while nothing is committed.
    pub fn new(ctx: &'a mut ChainContext, start: u64) -> Self {
        Self {
            ctx,
            start,
            received: 0,
        }
    }

    /// Logs read from the subscription so far, skipped ones included.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Returns `Cancelled` on shutdown; any other error means the
    /// subscription is gone and the caller should reconnect.
    pub async fn run(&mut self, mut stream: LogStream) -> Result<(), RelayerError> {
        // Highest block with emitted but uncommitted events.
        let mut pending: Option<u64> = None;

        loop {
            let item = tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(RelayerError::Cancelled),
                item = stream.next() => item,
            };

            let log = match item {
                None => return Err(RelayerError::StreamClosed("log stream ended".into())),
                Some(Err(e)) => return Err(e),
                Some(Ok(log)) => log,
            };
            self.received += 1;

            let Some(event) = self.ctx.decode(&log) else {
                continue;
            };
            let height = event.block_height;

            if height < self.ctx.checkpoint.next_height(self.start) {
                trace!(chain = %self.ctx.chain_id, height, "skipping log below start height");
                continue;
            }

            if let Some(previous) = pending.filter(|p| height > *p) {
                self.ctx.commit(previous).await?;
            }
            if pending.is_some_and(|p| height < p) {
                warn!(
                    chain = %self.ctx.chain_id,
                    height,
                    pending = ?pending,
                    "subscription delivered an older block"
                );
            }

            self.ctx.emit(event).await?;
            pending = Some(pending.map_or(height, |p| p.max(height)));
            debug!(chain = %self.ctx.chain_id, height, "live event emitted");
        }
    }
}
