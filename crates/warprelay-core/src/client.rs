//! Chain client capability traits.
//!
//! The engine is written once against [`ChainClient`]; each chain family
//! provides one implementation. Connections are created through a
//! [`Dialer`] so tests can substitute a fake node.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::config::SourceChainConfig;
use crate::error::RelayerError;
use crate::types::{BlockRange, EventFilter, RawLog};

/// Live log feed. Yields logs as they are mined and ends (usually with an
/// `Err`) when the underlying connection drops.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<RawLog, RelayerError>> + Send>>;

/// Query surface of a source chain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest known block height.
    async fn current_height(&self) -> Result<u64, RelayerError>;

    /// Historical logs matching `filter` within `range` (inclusive).
    ///
    /// Fails with `TransientQuery` on transport problems and with
    /// `RejectedRange` when the node refuses the range width.
    async fn filter_logs(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> Result<Vec<RawLog>, RelayerError>;

    /// Open a push subscription for logs matching `filter`.
    async fn subscribe_logs(&self, filter: &EventFilter) -> Result<LogStream, RelayerError>;
}

/// Creates a connected [`ChainClient`] for a source chain.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, source: &SourceChainConfig) -> Result<Arc<dyn ChainClient>, RelayerError>;
}
