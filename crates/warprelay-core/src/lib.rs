//! warprelay-core: foundation for the warp message subscription engine.
//!
//! # Architecture
//!
//! ```text
//! Subscriber (per chain)
//!     ├── Dialer → ChainClient  (current height, log queries, log subscription)
//!     ├── CheckpointManager     (durable last-processed height)
//!     ├── Backoff               (bounded exponential retry delays)
//!     └── mpsc::Sender<WarpLogEvent> (back-pressured output)
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use backoff::{Backoff, BackoffConfig};
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use client::{ChainClient, Dialer, LogStream};
pub use config::{ChainId, SourceChainConfig, SubscriberConfig, VmKind};
pub use error::RelayerError;
pub use state::{SubscriberMetrics, SubscriberState};
pub use types::{BlockRange, EventFilter, RawLog, WarpLogEvent, MAX_BLOCKS_PER_REQUEST};
