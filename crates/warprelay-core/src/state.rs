//! Subscriber lifecycle state and counters.

use serde::{Deserialize, Serialize};

/// Lifecycle of one chain's subscriber.
///
/// ```text
/// Initializing → CatchingUp → Live ⇄ Reconnecting
///       └→ Failed (configuration errors only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriberState {
    /// Loading the checkpoint and validating configuration.
    Initializing,
    /// Draining the historical gap up to the head snapshot.
    CatchingUp,
    /// Following the chain through the live subscription.
    Live,
    /// Waiting out the backoff, then re-dialing and closing the gap.
    Reconnecting,
    /// Shut down on request.
    Stopped,
    /// Halted on a configuration error.
    Failed,
}

impl SubscriberState {
    /// Returns `true` once the subscriber will make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Live => write!(f, "live"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Counters snapshot for one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberMetrics {
    pub events_emitted: u64,
    pub pages_scanned: u64,
    pub query_retries: u64,
    pub reconnections: u64,
    pub checkpoint_failures: u64,
    pub decode_errors: u64,
}
