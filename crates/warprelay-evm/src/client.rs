//! EVM chain client: `eth_blockNumber` / `eth_getLogs` over HTTP and
//! `eth_subscribe("logs")` over WebSocket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use warprelay_core::client::{ChainClient, Dialer, LogStream};
use warprelay_core::config::SourceChainConfig;
use warprelay_core::error::RelayerError;
use warprelay_core::types::{parse_hex_u64, BlockRange, EventFilter, RawLog};

use crate::rpc::{classify_logs_error, quantity, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::ws;

/// Configuration for `EvmClient`.
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
    /// How long to wait for the node to confirm `eth_subscribe`.
    pub subscribe_timeout: Duration,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

/// JSON-RPC client for one EVM source chain.
pub struct EvmClient {
    rpc_url: String,
    ws_url: String,
    http: reqwest::Client,
    subscribe_timeout: Duration,
    next_id: AtomicU64,
}

impl EvmClient {
    pub fn new(
        rpc_url: impl Into<String>,
        ws_url: impl Into<String>,
        config: EvmClientConfig,
    ) -> Result<Self, RelayerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RelayerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            rpc_url: rpc_url.into(),
            ws_url: ws_url.into(),
            http,
            subscribe_timeout: config.subscribe_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Client for the endpoints of a configured source chain.
    pub fn for_source(source: &SourceChainConfig, config: EvmClientConfig) -> Result<Self, RelayerError> {
        Self::new(source.rpc_url(), source.ws_url(), config)
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Send one request. The outer error covers transport failures, the inner
    /// one a JSON-RPC error object returned by the node.
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Result<Value, JsonRpcError>, RelayerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&req)
            .send()
            .await
            .map_err(|e| RelayerError::TransientQuery(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayerError::TransientQuery(format!(
                "{method}: HTTP {status}: {body}"
            )));
        }

        let resp = resp
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| RelayerError::TransientQuery(format!("{method}: {e}")))?;
        Ok(resp.into_result())
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    async fn current_height(&self) -> Result<u64, RelayerError> {
        let value = self
            .call("eth_blockNumber", vec![])
            .await?
            .map_err(|e| RelayerError::TransientQuery(e.to_string()))?;
        let hex = value
            .as_str()
            .ok_or_else(|| RelayerError::TransientQuery(format!("eth_blockNumber returned {value}")))?;
        parse_hex_u64(hex).map_err(|e| RelayerError::TransientQuery(e.to_string()))
    }

    async fn filter_logs(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> Result<Vec<RawLog>, RelayerError> {
        let mut params = ws::log_filter_params(filter);
        params["fromBlock"] = json!(quantity(range.from));
        params["toBlock"] = json!(quantity(range.to));

        let value = self
            .call("eth_getLogs", vec![params])
            .await?
            .map_err(|e| classify_logs_error(e, range))?;

        let logs: Vec<RawLog> = serde_json::from_value(value)
            .map_err(|e| RelayerError::TransientQuery(format!("malformed eth_getLogs result: {e}")))?;

        tracing::debug!(url = %self.rpc_url, %range, logs = logs.len(), "eth_getLogs");
        Ok(logs.into_iter().filter(|log| !log.is_removed()).collect())
    }

    async fn subscribe_logs(&self, filter: &EventFilter) -> Result<LogStream, RelayerError> {
        ws::subscribe_logs(&self.ws_url, filter, self.subscribe_timeout).await
    }
}

/// Dials `EvmClient`s for source chains.
#[derive(Debug, Clone, Default)]
pub struct EvmDialer {
    config: EvmClientConfig,
}

impl EvmDialer {
    pub fn new(config: EvmClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dialer for EvmDialer {
    async fn dial(&self, source: &SourceChainConfig) -> Result<Arc<dyn ChainClient>, RelayerError> {
        let client = EvmClient::for_source(source, self.config.clone())?;
        tracing::debug!(
            chain = %source.chain_id,
            rpc = %client.rpc_url(),
            ws = %client.ws_url(),
            "dialed source chain"
        );
        let client: Arc<dyn ChainClient> = Arc::new(client);
        Ok(client)
    }
}
