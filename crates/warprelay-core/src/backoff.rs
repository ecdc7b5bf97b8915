//! Bounded exponential backoff with jitter.
//!
//! The delay is a pure function of the attempt number and a jitter sample in
//! `[-1.0, 1.0]`; [`Backoff::next_delay`] draws the sample from `rand`.
//! Retries never give up on their own: callers loop until success or
//! shutdown.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::RelayerError;

/// Configuration for the backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    /// Cap on the exponential growth, in milliseconds.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Multiplier applied on each further attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Add ±`jitter * delay` random jitter (0.0 = none).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_ms() -> u64 {
    500
}
fn default_max_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Stateless backoff policy.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based) for a given jitter
    /// sample in `[-1.0, 1.0]`. Never exceeds `max_ms`.
    pub fn delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let base_ms = self.config.initial_ms as f64 * self.config.multiplier.powi(exponent);
        let cap_ms = self.config.max_ms as f64;
        let capped = base_ms.min(cap_ms);

        let jitter_ms = capped * self.config.jitter * jitter_sample.clamp(-1.0, 1.0);
        let total_ms = (capped + jitter_ms).clamp(0.0, cap_ms);
        Duration::from_millis(total_ms as u64)
    }

    /// Delay before the `attempt`-th retry with a random jitter sample.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay(attempt, sample)
    }

    /// Sleep for the `attempt`-th delay, returning early with
    /// [`RelayerError::Cancelled`] when `cancel` fires.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), RelayerError> {
        let delay = self.next_delay(attempt);
        tokio::select! {
            _ = cancel.cancelled() => Err(RelayerError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
