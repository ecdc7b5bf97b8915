//! Source chain configuration and chain identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::backoff::BackoffConfig;
use crate::error::RelayerError;
use crate::types::MAX_BLOCKS_PER_REQUEST;

// ─── ChainId ─────────────────────────────────────────────────────────────────

const CHECKSUM_LEN: usize = 4;

/// A 32-byte blockchain identifier in its CB58 text form
/// (base58 of the bytes followed by the last 4 bytes of their SHA-256).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId([u8; 32]);

impl ChainId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ChainId {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| RelayerError::Config(format!("chain id '{s}' is not base58: {e}")))?;
        if raw.len() != 32 + CHECKSUM_LEN {
            return Err(RelayerError::Config(format!(
                "chain id '{s}' decodes to {} bytes, expected {}",
                raw.len(),
                32 + CHECKSUM_LEN
            )));
        }
        let (body, checksum) = raw.split_at(32);
        let digest = Sha256::digest(body);
        if digest[digest.len() - CHECKSUM_LEN..] != *checksum {
            return Err(RelayerError::Config(format!("chain id '{s}' has a bad checksum")));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(body);
        Ok(Self(bytes))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest = Sha256::digest(self.0);
        let mut raw = self.0.to_vec();
        raw.extend_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
        write!(f, "{}", bs58::encode(raw).into_string())
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({self})")
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── VmKind ──────────────────────────────────────────────────────────────────

/// Chain family of a source chain. Each family has one client implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    Evm,
}

impl FromStr for VmKind {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            other => Err(RelayerError::Config(format!("unsupported vm '{other}'"))),
        }
    }
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
        }
    }
}

// ─── SourceChainConfig ───────────────────────────────────────────────────────

/// Connection details for one source chain.
///
/// Identifiers are kept as text so that a malformed value fails only the
/// orchestrator of that chain (see [`SourceChainConfig::validate`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceChainConfig {
    pub subnet_id: String,
    pub chain_id: String,
    #[serde(default = "default_vm")]
    pub vm: String,
    pub api_node_host: String,
    pub api_node_port: u16,
    #[serde(default)]
    pub encrypt_connection: bool,
    /// Explicit request/response endpoint; derived from the API node when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_endpoint: Option<String>,
    /// Explicit streaming endpoint; derived from the API node when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_endpoint: Option<String>,
    /// Height to start from when no checkpoint exists yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_block_height: Option<u64>,
}

fn default_vm() -> String {
    VmKind::Evm.to_string()
}

impl SourceChainConfig {
    /// Parse and check every field that can be malformed.
    pub fn validate(&self) -> Result<ChainId, RelayerError> {
        self.vm.parse::<VmKind>()?;
        if self.api_node_host.is_empty()
            && (self.rpc_endpoint.is_none() || self.ws_endpoint.is_none())
        {
            return Err(RelayerError::Config(format!(
                "chain {}: api-node-host is required when endpoints are not set",
                self.chain_id
            )));
        }
        self.chain_id.parse()
    }

    /// HTTP JSON-RPC endpoint.
    pub fn rpc_url(&self) -> String {
        match self.rpc_endpoint.as_deref().filter(|s| !s.is_empty()) {
            Some(url) => url.to_string(),
            None => self.node_url(if self.encrypt_connection { "https" } else { "http" }, "rpc"),
        }
    }

    /// WebSocket endpoint.
    pub fn ws_url(&self) -> String {
        match self.ws_endpoint.as_deref().filter(|s| !s.is_empty()) {
            Some(url) => url.to_string(),
            None => self.node_url(if self.encrypt_connection { "wss" } else { "ws" }, "ws"),
        }
    }

    fn node_url(&self, scheme: &str, suffix: &str) -> String {
        format!(
            "{scheme}://{}:{}/ext/bc/{}/{suffix}",
            self.api_node_host, self.api_node_port, self.chain_id
        )
    }
}

// ─── SubscriberConfig ────────────────────────────────────────────────────────

/// Engine tuning shared by every chain's subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubscriberConfig {
    /// Upper bound on `to - from` for a single log query.
    #[serde(default = "default_max_blocks")]
    pub max_blocks_per_request: u64,
    /// Height used when a chain has neither a checkpoint nor a configured
    /// start height.
    #[serde(default)]
    pub genesis_height: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_blocks() -> u64 {
    MAX_BLOCKS_PER_REQUEST
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_request: MAX_BLOCKS_PER_REQUEST,
            genesis_height: 0,
            backoff: BackoffConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CHAIN_ID: &str = "S4mMqUXe7vHsGiRAma6bv3CKnyaLssyAxmQ2KvFpX1KEvfFCD";

    fn source() -> SourceChainConfig {
        SourceChainConfig {
            subnet_id: "2TGBXcnwx5PqiXWiqxAKUaNSqDguXNh1mxnp82jui68hxJSZAx".into(),
            chain_id: TEST_CHAIN_ID.into(),
            vm: "evm".into(),
            api_node_host: "127.0.0.1".into(),
            api_node_port: 9650,
            encrypt_connection: false,
            rpc_endpoint: None,
            ws_endpoint: None,
            start_block_height: None,
        }
    }

    #[test]
    fn chain_id_roundtrips_through_cb58() {
        let id: ChainId = TEST_CHAIN_ID.parse().unwrap();
        assert_eq!(id.to_string(), TEST_CHAIN_ID);
        assert_eq!(ChainId::from_bytes(*id.as_bytes()), id);
    }

    #[test]
    fn chain_id_rejects_bad_checksum() {
        let mut tampered = TEST_CHAIN_ID.to_string();
        tampered.replace_range(0..1, "T");
        assert!(tampered.parse::<ChainId>().is_err());
        assert!("not-base58-0OIl".parse::<ChainId>().is_err());
        assert!("".parse::<ChainId>().is_err());
    }

    #[test]
    fn derived_endpoints() {
        let mut cfg = source();
        assert_eq!(
            cfg.rpc_url(),
            format!("http://127.0.0.1:9650/ext/bc/{TEST_CHAIN_ID}/rpc")
        );
        assert_eq!(cfg.ws_url(), format!("ws://127.0.0.1:9650/ext/bc/{TEST_CHAIN_ID}/ws"));

        cfg.encrypt_connection = true;
        assert!(cfg.rpc_url().starts_with("https://"));
        assert!(cfg.ws_url().starts_with("wss://"));

        cfg.rpc_endpoint = Some("https://subnets.avax.network/mysubnet/rpc".into());
        assert_eq!(cfg.rpc_url(), "https://subnets.avax.network/mysubnet/rpc");
    }

    #[test]
    fn validate_reports_config_errors() {
        assert!(source().validate().is_ok());

        let mut bad_vm = source();
        bad_vm.vm = "wasm".into();
        assert!(bad_vm.validate().unwrap_err().is_config());

        let mut bad_id = source();
        bad_id.chain_id = "abc".into();
        assert!(bad_id.validate().unwrap_err().is_config());
    }

    #[test]
    fn source_config_from_json() {
        let json = format!(
            r#"{{
                "subnet-id": "2TGBXcnwx5PqiXWiqxAKUaNSqDguXNh1mxnp82jui68hxJSZAx",
                "chain-id": "{TEST_CHAIN_ID}",
                "api-node-host": "127.0.0.1",
                "api-node-port": 9650,
                "rpc-endpoint": "https://subnets.avax.network/mysubnet/rpc"
            }}"#
        );
        let cfg: SourceChainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.vm, "evm");
        assert!(!cfg.encrypt_connection);
        assert_eq!(cfg.start_block_height, None);
    }

    #[test]
    fn subscriber_config_defaults() {
        let cfg: SubscriberConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_blocks_per_request, MAX_BLOCKS_PER_REQUEST);
        assert_eq!(cfg, SubscriberConfig::default());
    }
}
