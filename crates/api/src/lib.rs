//! Read-only call transport.
//!
//! Generators that need on-chain state (quotes, balances, reserves) talk to
//! the network through [`ReadOnlyTransport`]. The trait is the seam: tests and
//! offline tools plug in their own implementation, while [`JsonRpcClient`]
//! speaks plain JSON-RPC over HTTP.
//!
//! Nothing here retries. Retry policy belongs to the caller, which knows
//! whether a failed read is worth repeating.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use clipflow_types::{CallRequest, ClientConfig};
use reqwest::{Client, Url, header};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by a read-only transport.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("invalid rpc url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("http request failed: {0}")]
    Http(String),
    #[error("rpc endpoint returned http status {0}")]
    Status(u16),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("failed to decode rpc response: {0}")]
    Decode(String),
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<TransportError> },
}

impl TransportError {
    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Connection problems, rate limiting and server errors are transient. An
    /// RPC error is an answer (usually a revert) and will not change on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Simulates calls against current remote state without committing anything.
#[async_trait]
pub trait ReadOnlyTransport: Send + Sync {
    /// Executes `request` read-only and returns the raw return data.
    async fn call(&self, request: &CallRequest) -> Result<Bytes, TransportError>;

    /// Estimates the execution cost of `request`.
    async fn estimate_cost(&self, request: &CallRequest) -> Result<U256, TransportError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client for an Ethereum-style endpoint.
#[derive(Debug)]
pub struct JsonRpcClient {
    pub rpc_url: Url,
    http: Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(rpc_url: &str) -> Result<Self, TransportError> {
        let rpc_url = validate_rpc_url(rpc_url)?;
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            rpc_url,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(&config.network.rpc_url)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = request_body(id, method, params);
        debug!(url = %self.rpc_url, method, id, "sending rpc request");

        let response = self
            .http
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let text = response.text().await.map_err(|e| TransportError::Http(e.to_string()))?;
        parse_response(&text)
    }
}

#[async_trait]
impl ReadOnlyTransport for JsonRpcClient {
    async fn call(&self, request: &CallRequest) -> Result<Bytes, TransportError> {
        let params = json!([call_params(request)?, "latest"]);
        let result = self.request("eth_call", params).await?;
        serde_json::from_value(result).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn estimate_cost(&self, request: &CallRequest) -> Result<U256, TransportError> {
        let params = json!([call_params(request)?]);
        let result = self.request("eth_estimateGas", params).await?;
        serde_json::from_value(result).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn validate_rpc_url(rpc_url: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: rpc_url.to_string(),
        reason,
    };
    let parsed = Url::parse(rpc_url.trim()).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

fn call_params(request: &CallRequest) -> Result<Value, TransportError> {
    serde_json::to_value(request).map_err(|e| TransportError::Decode(e.to_string()))
}

fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

fn parse_response(text: &str) -> Result<Value, TransportError> {
    let response: RpcResponse = serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))?;
    if let Some(error) = response.error {
        return Err(TransportError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    response
        .result
        .ok_or_else(|| TransportError::Decode("response carries neither result nor error".to_string()))
}
