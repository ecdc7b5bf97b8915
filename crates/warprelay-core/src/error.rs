//! Error types for the warp relayer engine.

use thiserror::Error;

/// Errors that can occur while watching a source chain.
#[derive(Debug, Error)]
pub enum RelayerError {
    /// Malformed chain identifier, unknown VM kind, bad endpoint, etc.
    /// Fatal for the affected chain only.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout, connection reset or node-side failure on a request/response
    /// query. Retried with backoff.
    #[error("Transient query error: {0}")]
    TransientQuery(String),

    /// The node refused a `[from, to]` log query as too wide.
    #[error("Node rejected block range [{from}, {to}]: {reason}")]
    RejectedRange { from: u64, to: u64, reason: String },

    /// The live log subscription ended (connection dropped, node restart).
    #[error("Log subscription closed: {0}")]
    StreamClosed(String),

    /// Checkpoint persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A matching log could not be turned into a `WarpLogEvent`.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Shutdown was requested while the operation was suspended.
    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl RelayerError {
    /// Returns `true` if the operation may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientQuery(_) | Self::StreamClosed(_) | Self::Storage(_)
        )
    }

    /// Returns `true` for non-recoverable configuration problems.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_rejected_range(&self) -> bool {
        matches!(self, Self::RejectedRange { .. })
    }
}
