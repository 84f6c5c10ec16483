use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// Head of the chain as seen by one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    pub number: u64,
    /// Unix seconds
    pub timestamp: i64,
}

/// What the monitor needs from an RPC transport.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn latest_block(&self) -> Result<BlockHead, ProbeError>;

    /// Cheap reachability check run once before polling.
    async fn block_number(&self) -> Result<u64, ProbeError> {
        Ok(self.latest_block().await?.number)
    }

    async fn chain_id(&self) -> Result<u64, ProbeError>;

    async fn client_version(&self) -> Result<String, ProbeError>;

    /// Diagnostics only, never used to infer the chain id.
    async fn network_id(&self) -> Result<u64, ProbeError>;
}

// JSON-RPC request
#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<serde_json::Value>,
    id: u64,
}

// JSON-RPC response
#[derive(Deserialize, Debug)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

// JSON-RPC error
#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// Only the fields we need, so PoA headers with long extraData decode too
#[derive(Deserialize, Debug)]
struct Block {
    number: String,    // Hex-encoded block number
    timestamp: String, // Hex-encoded timestamp
}

/// [`EndpointProbe`] over JSON-RPC 2.0 / HTTP.
pub struct JsonRpcProbe {
    url: String,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl JsonRpcProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, ProbeError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(ProbeError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        response.result.ok_or(ProbeError::MissingResult(method))
    }
}

#[async_trait]
impl EndpointProbe for JsonRpcProbe {
    async fn latest_block(&self) -> Result<BlockHead, ProbeError> {
        let block: Block = self
            .call(
                "eth_getBlockByNumber",
                vec![
                    serde_json::Value::String("latest".to_string()),
                    serde_json::Value::Bool(false),
                ],
            )
            .await?;

        let number = parse_quantity("number", &block.number)?;
        let timestamp = parse_quantity("timestamp", &block.timestamp)?;
        Ok(BlockHead {
            number,
            timestamp: i64::try_from(timestamp).map_err(|_| ProbeError::Malformed {
                field: "timestamp",
                value: block.timestamp.clone(),
            })?,
        })
    }

    async fn block_number(&self) -> Result<u64, ProbeError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_quantity("block number", &hex)
    }

    async fn chain_id(&self) -> Result<u64, ProbeError> {
        let hex: String = self.call("eth_chainId", vec![]).await?;
        parse_quantity("chain id", &hex)
    }

    async fn client_version(&self) -> Result<String, ProbeError> {
        self.call("web3_clientVersion", vec![]).await
    }

    async fn network_id(&self) -> Result<u64, ProbeError> {
        let version: String = self.call("net_version", vec![]).await?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProbeError::Malformed {
                field: "network id",
                value: version,
            });
        }
        version.parse().map_err(|_| ProbeError::Malformed {
            field: "network id",
            value: version.clone(),
        })
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(field: &'static str, value: &str) -> Result<u64, ProbeError> {
    let malformed = || ProbeError::Malformed {
        field,
        value: value.to_string(),
    };
    let digits = value.strip_prefix("0x").ok_or_else(malformed)?;
    u64::from_str_radix(digits, 16).map_err(|_| malformed())
}
