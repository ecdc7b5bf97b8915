//! Catch-up scanner: drains historical blocks up to a head snapshot.
//!
//! # Paging
//! `[start, head]` is tiled by pages of at most `max_blocks_per_request + 1`
//! blocks. For each page: fetch logs → emit events → commit the page's upper
//! bound. The head is read once per pass; blocks mined afterwards belong to
//! the live subscription.
//!
//! # Failures
//! Transient query errors are retried with backoff until shutdown, without
//! advancing the checkpoint. A page the node rejects as too wide is retried
//! once as two halves; a second rejection is returned to the caller.

use tracing::{debug, info, warn};

use warprelay_core::client::ChainClient;
use warprelay_core::error::RelayerError;
use warprelay_core::types::{BlockRange, RawLog};

use crate::context::ChainContext;

/// Outcome of a completed catch-up pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Head snapshot the pass ran up to.
    pub head: u64,
    /// Number of pages scanned.
    pub pages: u64,
    /// Number of events handed off.
    pub events: u64,
}

/// One catch-up pass over a connected client.
pub struct CatchUp<'a> {
    client: &'a dyn ChainClient,
    ctx: &'a mut ChainContext,
}

impl<'a> CatchUp<'a> {
    pub fn new(client: &'a dyn ChainClient, ctx: &'a mut ChainContext) -> Self {
        Self { client, ctx }
    }

    /// Emit every matching log in `[start, head]`, where `head` is the chain
    /// height read at the start of the call. Issues no log query when
    /// `start > head`.
    pub async fn process_from_height(&mut self, start: u64) -> Result<CatchUpReport, RelayerError> {
        let head = self.head_snapshot().await?;
        let mut report = CatchUpReport {
            head,
            pages: 0,
            events: 0,
        };

        if start > head {
            debug!(chain = %self.ctx.chain_id, start, head, "already caught up");
            return Ok(report);
        }

        info!(chain = %self.ctx.chain_id, from = start, to = head, "starting catch-up");

        for page in BlockRange::pages(start, head, self.ctx.config.max_blocks_per_request) {
            if self.ctx.cancel.is_cancelled() {
                return Err(RelayerError::Cancelled);
            }

            let logs = self.fetch_page(page).await?;
            let mut events: Vec<_> = logs
                .iter()
                .filter_map(|log| self.ctx.decode(log))
                .filter(|event| {
                    let inside = page.contains(event.block_height);
                    if !inside {
                        warn!(
                            chain = %self.ctx.chain_id,
                            height = event.block_height,
                            %page,
                            "node returned a log outside the requested range"
                        );
                    }
                    inside
                })
                .collect();
            events.sort_by_key(|event| (event.block_height, event.log_index));

            let count = events.len() as u64;
            for event in events {
                self.ctx.emit(event).await?;
            }
            self.ctx.commit(page.to).await?;
            self.ctx.metrics.page_scanned();

            report.pages += 1;
            report.events += count;
            debug!(
                chain = %self.ctx.chain_id,
                from = page.from,
                to = page.to,
                events = count,
                "catch-up page complete"
            );
        }

        info!(
            chain = %self.ctx.chain_id,
            head,
            pages = report.pages,
            events = report.events,
            "catch-up complete"
        );
        Ok(report)
    }

    async fn head_snapshot(&self) -> Result<u64, RelayerError> {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(RelayerError::Cancelled),
                r = self.client.current_height() => r,
            };
            match result {
                Ok(head) => return Ok(head),
                Err(e) if e.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    self.ctx.metrics.query_retried();
                    warn!(chain = %self.ctx.chain_id, attempt, error = %e, "head query failed, retrying");
                    self.ctx.backoff.wait(attempt, &self.ctx.cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Logs for `range`, splitting it once if the node rejects its width.
    async fn fetch_page(&self, range: BlockRange) -> Result<Vec<RawLog>, RelayerError> {
        match self.query_with_retry(range).await {
            Err(e) if e.is_rejected_range() => {
                let Some((lower, upper)) = range.split() else {
                    return Err(e);
                };
                warn!(
                    chain = %self.ctx.chain_id,
                    from = range.from,
                    to = range.to,
                    error = %e,
                    "range rejected, retrying as two halves"
                );
                let mut logs = self.query_with_retry(lower).await?;
                logs.extend(self.query_with_retry(upper).await?);
                Ok(logs)
            }
            other => other,
        }
    }

    async fn query_with_retry(&self, range: BlockRange) -> Result<Vec<RawLog>, RelayerError> {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(RelayerError::Cancelled),
                r = self.client.filter_logs(&self.ctx.filter, range) => r,
            };
            match result {
                Ok(logs) => return Ok(logs),
                Err(e) if e.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    self.ctx.metrics.query_retried();
                    let delay = self.ctx.backoff.next_delay(attempt);
                    warn!(
                        chain = %self.ctx.chain_id,
                        from = range.from,
                        to = range.to,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "log query failed, retrying"
                    );
                    tokio::select! {
                        _ = self.ctx.cancel.cancelled() => return Err(RelayerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
