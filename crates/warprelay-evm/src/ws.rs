//! WebSocket log subscription (`eth_subscribe("logs", filter)`).
//!
//! [`subscribe_logs`] connects, waits for the node to confirm the
//! subscription, then hands the socket to a background task that forwards
//! every notification into a bounded channel. The returned stream ends with
//! `Err(StreamClosed)` when the connection drops; reconnecting is the
//! subscriber's job.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use warprelay_core::client::LogStream;
use warprelay_core::error::RelayerError;
use warprelay_core::types::{EventFilter, RawLog};

const SUBSCRIBE_ID: u64 = 1;
const CHANNEL_CAPACITY: usize = 512;

/// Open a log subscription on `ws_url`.
pub async fn subscribe_logs(
    ws_url: &str,
    filter: &EventFilter,
    confirm_timeout: Duration,
) -> Result<LogStream, RelayerError> {
    let (ws, _) = connect_async(ws_url)
        .await
        .map_err(|e| RelayerError::TransientQuery(format!("WebSocket connect to {ws_url} failed: {e}")))?;
    let (mut write, mut read) = ws.split();

    let sub_msg = serde_json::json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_ID,
        "method": "eth_subscribe",
        "params": ["logs", log_filter_params(filter)]
    });
    write
        .send(Message::Text(sub_msg.to_string().into()))
        .await
        .map_err(|e| RelayerError::TransientQuery(format!("failed to send eth_subscribe: {e}")))?;

    let confirmation = async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(result) = parse_confirmation(text.as_str()) {
                        return result;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(RelayerError::TransientQuery(format!("WebSocket error: {e}"))),
            }
        }
        Err(RelayerError::TransientQuery(
            "connection closed before subscription was confirmed".into(),
        ))
    };
    let subscription_id = tokio::time::timeout(confirm_timeout, confirmation)
        .await
        .map_err(|_| RelayerError::TransientQuery("eth_subscribe confirmation timed out".into()))??;

    info!(url = %ws_url, subscription = %subscription_id, "log subscription open");

    let (tx, rx) = mpsc::channel::<Result<RawLog, RelayerError>>(CHANNEL_CAPACITY);
    let url = ws_url.to_string();

    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                // Stream dropped by the subscriber.
                _ = tx.closed() => break,
                msg = read.next() => msg,
            };
            match msg {
                None => {
                    let _ = tx.send(Err(RelayerError::StreamClosed("connection ended".into()))).await;
                    break;
                }
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "WebSocket error");
                    let _ = tx.send(Err(RelayerError::StreamClosed(e.to_string()))).await;
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(log) = parse_subscription_log(text.as_str()) {
                        if tx.send(Ok(log)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(url = %url, ?frame, "WebSocket closed by server");
                    let _ = tx.send(Err(RelayerError::StreamClosed("closed by server".into()))).await;
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
            }
        }
        debug!(url = %url, "log subscription task ended");
    });

    Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })))
}

/// `eth_getLogs` / `eth_subscribe` filter object (without the block range).
pub fn log_filter_params(filter: &EventFilter) -> Value {
    serde_json::json!({
        "address": [filter.address],
        "topics": [[filter.topic0], Value::Null, Value::Null],
    })
}

/// Parse the reply to our `eth_subscribe` call. `None` for other messages.
fn parse_confirmation(text: &str) -> Option<Result<String, RelayerError>> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("id")?.as_u64()? != SUBSCRIBE_ID {
        return None;
    }
    if let Some(err) = v.get("error") {
        return Some(Err(RelayerError::TransientQuery(format!("eth_subscribe rejected: {err}"))));
    }
    Some(
        v.get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayerError::TransientQuery("eth_subscribe returned no id".into())),
    )
}

/// Parse an `eth_subscription` notification into a `RawLog`.
/// Returns `None` for other messages, removed logs, or unparseable payloads.
fn parse_subscription_log(text: &str) -> Option<RawLog> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("method")?.as_str()? != "eth_subscription" {
        return None;
    }
    let result = v.get("params")?.get("result")?.clone();
    let log: RawLog = match serde_json::from_value(result) {
        Ok(log) => log,
        Err(e) => {
            warn!(error = %e, "unparseable log notification");
            return None;
        }
    };
    (!log.is_removed()).then_some(log)
}
