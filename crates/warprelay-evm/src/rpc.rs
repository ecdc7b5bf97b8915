//! JSON-RPC 2.0 wire types and error classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warprelay_core::error::RelayerError;
use warprelay_core::types::BlockRange;

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Node error code used by several clients for "query returned too many
/// results / range too wide".
const LIMIT_EXCEEDED: i64 = -32005;

const RANGE_REJECTION_HINTS: &[&str] = &[
    "block range",
    "range too large",
    "range is too large",
    "exceed maximum block range",
    "too many blocks",
    "query returned more than",
];

/// Map a node error on an `eth_getLogs` call over `range`.
pub fn classify_logs_error(err: JsonRpcError, range: BlockRange) -> RelayerError {
    let message = err.message.to_ascii_lowercase();
    if err.code == LIMIT_EXCEEDED || RANGE_REJECTION_HINTS.iter().any(|h| message.contains(h)) {
        RelayerError::RejectedRange {
            from: range.from,
            to: range.to,
            reason: err.to_string(),
        }
    } else {
        RelayerError::TransientQuery(err.to_string())
    }
}

/// Encode a block height as a JSON-RPC quantity.
pub fn quantity(n: u64) -> String {
    format!("{n:#x}")
}
