//! Relayer configuration file.
//!
//! ```json
//! {
//!   "log-level": "info",
//!   "storage-location": "./.warprelay-storage",
//!   "source-subnets": [
//!     {
//!       "subnet-id": "2TGBXcnwx5PqiXWiqxAKUaNSqDguXNh1mxnp82jui68hxJSZAx",
//!       "chain-id": "S4mMqUXe7vHsGiRAma6bv3CKnyaLssyAxmQ2KvFpX1KEvfFCD",
//!       "vm": "evm",
//!       "api-node-host": "127.0.0.1",
//!       "api-node-port": 9650
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use warprelay_core::backoff::BackoffConfig;
use warprelay_core::config::{ChainId, SourceChainConfig, SubscriberConfig};
use warprelay_core::error::RelayerError;
use warprelay_core::types::MAX_BLOCKS_PER_REQUEST;

use crate::logging::LogConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    /// Per-crate level overrides, e.g. `{"warprelay-evm": "debug"}`.
    #[serde(default)]
    pub log_components: BTreeMap<String, String>,
    /// Checkpoint directory, or a SQLite database (`*.db` / `sqlite:` URL).
    #[serde(default = "default_storage_location")]
    pub storage_location: String,
    #[serde(default = "default_max_blocks")]
    pub max_blocks_per_request: u64,
    /// Capacity of the output channel shared by all chains.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub backoff: BackoffConfig,
    pub source_subnets: Vec<SourceChainConfig>,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_storage_location() -> String {
    "./.warprelay-storage".into()
}

fn default_max_blocks() -> u64 {
    MAX_BLOCKS_PER_REQUEST
}

fn default_channel_capacity() -> usize {
    1024
}

impl RelayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings shared by all chains. Per-chain problems are left to
    /// each chain's subscriber so one bad entry does not stop the others.
    pub fn validate(&self) -> Result<()> {
        if self.source_subnets.is_empty() {
            bail!("source-subnets is empty");
        }
        if self.max_blocks_per_request == 0 {
            bail!("max-blocks-per-request must be positive");
        }
        if self.channel_capacity == 0 {
            bail!("channel-capacity must be positive");
        }
        if self.backoff.initial_ms > self.backoff.max_ms {
            bail!("backoff initial-ms exceeds max-ms");
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            bail!("backoff jitter must be within [0, 1]");
        }
        let mut seen = HashSet::new();
        for source in &self.source_subnets {
            if !seen.insert(source.chain_id.as_str()) {
                bail!("chain {} is configured twice", source.chain_id);
            }
        }
        Ok(())
    }

    /// Chain ids of every source, failing on the first invalid chain.
    pub fn chain_ids(&self) -> Result<Vec<ChainId>, RelayerError> {
        self.source_subnets.iter().map(SourceChainConfig::validate).collect()
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            max_blocks_per_request: self.max_blocks_per_request,
            genesis_height: 0,
            backoff: self.backoff.clone(),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            components: self.log_components.clone(),
            json: self.log_json,
        }
    }
}
