//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! Transport failures (connection errors, timeouts, 5xx and 429 responses)
//! are retried with exponential backoff. JSON-RPC error objects are returned
//! to the caller as-is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bountyindex_core::error::IndexerError;

use crate::fetcher::{parse_hex_u64, EvmRpcClient, LogFilter, RawLog};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Response(String),
}

impl RpcError {
    /// Whether the request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rpc { .. } | Self::Response(_) => false,
        }
    }
}

impl From<RpcError> for IndexerError {
    fn from(e: RpcError) -> Self {
        IndexerError::Rpc(e.to_string())
    }
}

// ─── Retry policy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the first try).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Caps exponential growth.
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the `attempt`-th retry (1-based), or `None` once retries
    /// are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let base_ms =
            self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped = base_ms.min(self.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// JSON-RPC client for a single EVM endpoint.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(
        url: impl Into<String>,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `method` with `params`, retrying transport failures.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(method, &params).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(method, attempt, error = %e, url = %self.url, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: params.clone(),
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Status { status, body });
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let value = self.request("eth_blockNumber", json!([])).await?;
        let hex = value
            .as_str()
            .ok_or_else(|| RpcError::Response(format!("eth_blockNumber returned {value}")))?;
        parse_hex_u64(hex)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let value = self.request("eth_getLogs", json!([filter.to_params()])).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::Response(format!("eth_getLogs: {e}")).into())
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError> {
        let value = self
            .request("eth_getBlockByNumber", json!([format!("{number:#x}"), false]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let hex = value["timestamp"]
            .as_str()
            .ok_or_else(|| RpcError::Response(format!("block {number} has no timestamp")))?;
        let ts = parse_hex_u64(hex)?;
        i64::try_from(ts)
            .map(Some)
            .map_err(|_| RpcError::Response(format!("block {number} timestamp {ts} out of range")).into())
    }
}
