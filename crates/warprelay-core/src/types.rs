//! Shared types for the subscription pipeline.

use std::str::FromStr;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use crate::config::ChainId;
use crate::error::RelayerError;

/// Address of the warp messenger precompile on every subnet-evm chain.
pub const WARP_PRECOMPILE_ADDRESS: &str = "0x0200000000000000000000000000000000000005";

/// Solidity signature of the event emitted for each outgoing warp message.
pub const SEND_WARP_MESSAGE_SIGNATURE: &str = "SendWarpMessage(address,bytes32,bytes)";

/// Default page width for `eth_getLogs`: each page spans at most
/// `MAX_BLOCKS_PER_REQUEST + 1` blocks.
pub const MAX_BLOCKS_PER_REQUEST: u64 = 200;

/// Keccak-256 of an event signature, `0x`-prefixed (the log's `topics[0]`).
pub fn event_topic(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    hasher.update(signature.as_bytes());
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    format!("0x{}", hex::encode(out))
}

// ─── EventFilter ─────────────────────────────────────────────────────────────

/// The `(topic0, address)` pair identifying relevant logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Event signature hash (`topics[0]`).
    pub topic0: String,
    /// Contract address that emits the event.
    pub address: String,
}

impl EventFilter {
    pub fn new(topic0: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            topic0: topic0.into(),
            address: address.into(),
        }
    }

    /// Filter for `SendWarpMessage` logs from the warp precompile.
    pub fn warp() -> Self {
        Self::new(
            event_topic(SEND_WARP_MESSAGE_SIGNATURE),
            WARP_PRECOMPILE_ADDRESS,
        )
    }

    /// Returns `true` if `log` was emitted by the watched contract with the
    /// watched signature. Hex comparisons are case-insensitive.
    pub fn matches(&self, log: &RawLog) -> bool {
        log.address.eq_ignore_ascii_case(&self.address)
            && log
                .topics
                .first()
                .is_some_and(|t| t.eq_ignore_ascii_case(&self.topic0))
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::warp()
    }
}

// ─── BlockRange ──────────────────────────────────────────────────────────────

/// Inclusive `[from, to]` block range for a single log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Returns `None` when `from > to`.
    pub fn new(from: u64, to: u64) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    /// Number of blocks covered (`to - from + 1`, saturating at `u64::MAX`).
    pub fn width(&self) -> u64 {
        (self.to - self.from).saturating_add(1)
    }

    pub fn contains(&self, height: u64) -> bool {
        self.from <= height && height <= self.to
    }

    /// Split into two halves, the first one covering the lower heights.
    /// Single-block ranges cannot be split.
    pub fn split(&self) -> Option<(BlockRange, BlockRange)> {
        if self.from == self.to {
            return None;
        }
        let mid = self.from + (self.to - self.from) / 2;
        Some((
            BlockRange { from: self.from, to: mid },
            BlockRange { from: mid + 1, to: self.to },
        ))
    }

    /// Pages covering `[start, head]`, each spanning at most
    /// `max_blocks_per_request + 1` blocks. Empty when `start > head`.
    pub fn pages(start: u64, head: u64, max_blocks_per_request: u64) -> Pages {
        Pages {
            cursor: (start <= head).then_some(start),
            head,
            max_blocks_per_request,
        }
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Iterator returned by [`BlockRange::pages`].
#[derive(Debug, Clone)]
pub struct Pages {
    cursor: Option<u64>,
    head: u64,
    max_blocks_per_request: u64,
}

impl Iterator for Pages {
    type Item = BlockRange;

    fn next(&mut self) -> Option<BlockRange> {
        let from = self.cursor?;
        let to = from
            .saturating_add(self.max_blocks_per_request)
            .min(self.head);
        self.cursor = to.checked_add(1).filter(|next| *next <= self.head);
        Some(BlockRange { from, to })
    }
}

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs` or an `eth_subscribe` feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: String,
    #[serde(rename = "logIndex", default)]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, RelayerError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> Result<u32, RelayerError> {
        let index = parse_hex_u64(&self.log_index)?;
        u32::try_from(index).map_err(|_| RelayerError::Decode(format!("log index {index} overflows u32")))
    }

    /// Returns `true` if this log was dropped by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, RelayerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| RelayerError::Decode(format!("invalid hex quantity '{s}': {e}")))
}

/// Decode `0x`-prefixed hex bytes.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, RelayerError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| RelayerError::Decode(format!("invalid hex data: {e}")))
}

// ─── WarpLogEvent ────────────────────────────────────────────────────────────

/// A decoded `SendWarpMessage` log, ready for the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarpLogEvent {
    /// Source chain the log was observed on.
    pub chain_id: ChainId,
    /// Height of the block containing the log.
    pub block_height: u64,
    pub tx_hash: String,
    /// Position of the log within its block.
    pub log_index: u32,
    /// Sender of the warp message (`topics[1]`, 20-byte address).
    pub source_address: String,
    /// Unsigned message ID (`topics[2]`).
    pub message_id: String,
    /// ABI-encoded event data.
    pub payload: Vec<u8>,
}

impl WarpLogEvent {
    /// Build an event from a matching raw log.
    pub fn from_raw(chain_id: &ChainId, log: &RawLog) -> Result<Self, RelayerError> {
        if log.topics.len() < 3 {
            return Err(RelayerError::Decode(format!(
                "expected 3 topics, got {}",
                log.topics.len()
            )));
        }
        let sender = parse_topic(&log.topics[1])?;
        let message_id = parse_topic(&log.topics[2])?;
        Ok(Self {
            chain_id: chain_id.clone(),
            block_height: log.block_number_u64()?,
            tx_hash: log.tx_hash.clone(),
            log_index: log.log_index_u32()?,
            source_address: format!("0x{}", hex::encode(Address::from_word(sender))),
            message_id: format!("0x{}", hex::encode(message_id)),
            payload: decode_hex(&log.data)?,
        })
    }

    /// ABI-decode the `bytes message` argument carried in the payload.
    pub fn unsigned_message(&self) -> Result<Vec<u8>, RelayerError> {
        match DynSolType::Bytes.abi_decode(&self.payload) {
            Ok(DynSolValue::Bytes(message)) => Ok(message),
            Ok(other) => Err(RelayerError::Decode(format!(
                "expected bytes message, got {other:?}"
            ))),
            Err(e) => Err(RelayerError::Decode(format!("invalid message payload: {e}"))),
        }
    }
}

/// Parse an indexed topic as a 32-byte word.
fn parse_topic(topic: &str) -> Result<B256, RelayerError> {
    B256::from_str(topic).map_err(|e| RelayerError::Decode(format!("invalid topic '{topic}': {e}")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
