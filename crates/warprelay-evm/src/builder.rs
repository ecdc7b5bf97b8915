//! Fluent builder API for creating subscribers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warprelay_core::checkpoint::MemoryCheckpointStore;
//! use warprelay_evm::SubscriberBuilder;
//!
//! # fn example(source: warprelay_core::config::SourceChainConfig) -> Result<(), warprelay_core::error::RelayerError> {
//! let (tx, _rx) = tokio::sync::mpsc::channel(1024);
//! let subscriber = SubscriberBuilder::new(source)
//!     .max_blocks_per_request(200)
//!     .store(Arc::new(MemoryCheckpointStore::new()))
//!     .output(tx)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use warprelay_core::backoff::BackoffConfig;
use warprelay_core::checkpoint::CheckpointStore;
use warprelay_core::client::Dialer;
use warprelay_core::config::{SourceChainConfig, SubscriberConfig};
use warprelay_core::error::RelayerError;
use warprelay_core::types::{EventFilter, WarpLogEvent};

use crate::client::EvmDialer;
use crate::subscriber::Subscriber;

/// Fluent builder for [`Subscriber`].
pub struct SubscriberBuilder {
    source: SourceChainConfig,
    config: SubscriberConfig,
    filter: EventFilter,
    dialer: Option<Arc<dyn Dialer>>,
    store: Option<Arc<dyn CheckpointStore>>,
    output: Option<mpsc::Sender<WarpLogEvent>>,
}

impl SubscriberBuilder {
    pub fn new(source: SourceChainConfig) -> Self {
        Self {
            source,
            config: SubscriberConfig::default(),
            filter: EventFilter::warp(),
            dialer: None,
            store: None,
            output: None,
        }
    }

    /// Replace all engine tuning at once.
    pub fn config(mut self, config: SubscriberConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the upper bound on `to - from` for a single log query.
    pub fn max_blocks_per_request(mut self, n: u64) -> Self {
        self.config.max_blocks_per_request = n;
        self
    }

    /// Set the start height for chains with no checkpoint and no configured
    /// start height.
    pub fn genesis_height(mut self, height: u64) -> Self {
        self.config.genesis_height = height;
        self
    }

    /// Set the retry/reconnect backoff.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the event filter (defaults to `SendWarpMessage` on the warp precompile).
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the dialer (defaults to [`EvmDialer`]).
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Set the checkpoint store.
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the output channel shared with the delivery pipeline.
    pub fn output(mut self, output: mpsc::Sender<WarpLogEvent>) -> Self {
        self.output = Some(output);
        self
    }

    /// Build the `Subscriber`. A store and an output channel are required.
    pub fn build(self) -> Result<Subscriber, RelayerError> {
        let store = self
            .store
            .ok_or_else(|| RelayerError::Config("checkpoint store not set".into()))?;
        let output = self
            .output
            .ok_or_else(|| RelayerError::Config("output channel not set".into()))?;
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(EvmDialer::default()));

        Ok(Subscriber::new(self.source, self.config, dialer, store, output).with_filter(self.filter))
    }
}
