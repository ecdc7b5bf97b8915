//! Checkpoint manager: persists the last fully handed-off height per chain.
//!
//! A checkpoint at height `h` means every matching log in blocks `<= h` has
//! been handed to the output channel. On restart the subscriber resumes at
//! `h + 1`. Heights only move forward, and the in-memory value is advanced
//! only after the store reports a durable write.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::ChainId;
use crate::error::RelayerError;

/// A persisted checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Checkpoint {
    pub chain_id: ChainId,
    /// Last fully processed block height.
    pub latest_processed_block: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn now(chain_id: ChainId, height: u64) -> Self {
        Self {
            chain_id,
            latest_processed_block: height,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Durable per-chain height storage.
///
/// Implementations include `MemoryCheckpointStore`, `JsonFileStorage`
/// and `SqliteStorage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last durably recorded height, or `None` for a chain seen for the
    /// first time.
    async fn get_height(&self, chain_id: &ChainId) -> Result<Option<u64>, RelayerError>;

    /// Persist `height`. Once this returns `Ok`, a later `get_height` (even
    /// after a crash) returns `height` or newer.
    async fn set_height(&self, chain_id: &ChainId, height: u64) -> Result<(), RelayerError>;
}

/// Tracks the committed height of a single chain.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    chain_id: ChainId,
    backoff: Backoff,
    committed: Option<u64>,
    failures: u64,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, chain_id: ChainId, backoff: Backoff) -> Self {
        Self {
            store,
            chain_id,
            backoff,
            committed: None,
            failures: 0,
        }
    }

    /// Read the stored height into memory.
    pub async fn load(&mut self) -> Result<Option<u64>, RelayerError> {
        let height = self.store.get_height(&self.chain_id).await?;
        self.committed = height;
        Ok(height)
    }

    /// Last durably committed height.
    pub fn committed(&self) -> Option<u64> {
        self.committed
    }

    /// First height not yet covered by the checkpoint.
    pub fn next_height(&self, default_start: u64) -> u64 {
        match self.committed {
            Some(h) => h.saturating_add(1),
            None => default_start,
        }
    }

    /// Number of failed persistence attempts so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Durably advance the checkpoint to `height`.
    ///
    /// Heights at or below the committed one are ignored. Store failures are
    /// retried with backoff until the write succeeds or `cancel` fires; the
    /// in-memory height is only updated after success.
    pub async fn commit(&mut self, height: u64, cancel: &CancellationToken) -> Result<(), RelayerError> {
        if self.committed.is_some_and(|c| height <= c) {
            return Ok(());
        }
        let mut attempt = 0u32;
        loop {
            match self.store.set_height(&self.chain_id, height).await {
                Ok(()) => {
                    tracing::debug!(chain = %self.chain_id, height, "checkpoint committed");
                    self.committed = Some(height);
                    return Ok(());
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    self.failures += 1;
                    tracing::warn!(
                        chain = %self.chain_id,
                        height,
                        attempt,
                        error = %e,
                        "checkpoint write failed, retrying"
                    );
                    self.backoff.wait(attempt, cancel).await?;
                }
            }
        }
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<ChainId, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a height, e.g. to simulate a previous run.
    pub fn with_height(self, chain_id: ChainId, height: u64) -> Self {
        self.data.lock().unwrap().insert(chain_id, height);
        self
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_height(&self, chain_id: &ChainId) -> Result<Option<u64>, RelayerError> {
        Ok(self.data.lock().unwrap().get(chain_id).copied())
    }

    async fn set_height(&self, chain_id: &ChainId, height: u64) -> Result<(), RelayerError> {
        self.data.lock().unwrap().insert(chain_id.clone(), height);
        Ok(())
    }
}
