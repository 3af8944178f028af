//! JSON-RPC client for the main-chain node

use crate::core::{Difficulty, Hash};
use crate::error::{Error, Result, RpcError};
use crate::mainchain::MainChainHeader;
use crate::mempool::TxEntry;
use crate::protocol::MinerData;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Request timeout for a single RPC call
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between boot-RPC retries
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Minimum node RPC version (v3.8)
pub const MIN_RPC_VERSION: u64 = 0x30008;

/// `get_info` fields the daemon cares about
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    /// Node finished syncing
    pub synchronized: bool,
    /// Node is busy catching up
    pub busy_syncing: bool,
    /// Network flags; exactly one is set
    #[serde(default)]
    pub mainnet: bool,
    #[allow(missing_docs)]
    #[serde(default)]
    pub testnet: bool,
    #[allow(missing_docs)]
    #[serde(default)]
    pub stagenet: bool,
}

/// The client
#[derive(Clone)]
pub struct NodeRpcClient {
    client: reqwest::Client,
    url: String,
}

impl NodeRpcClient {
    /// Create a client for `http://host:port/json_rpc`
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            client,
            url: format!("http://{}:{}/json_rpc", host, port),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        debug!("rpc call {} -> {}", method, self.url);
        let body = json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::Rpc(RpcError::ConnectionFailed {
                    url: self.url.clone(),
                    message: e.to_string(),
                })
            })?;

        if !response.status().is_success() {
            return Err(Error::Rpc(RpcError::HttpStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            }));
        }

        let doc: Value = response.json().await.map_err(Error::Http)?;
        if let Some(err) = doc.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::rpc_daemon(method, message));
        }
        doc.get("result")
            .cloned()
            .ok_or_else(|| Error::rpc_schema(method, "missing result"))
    }

    /// `get_info`
    pub async fn get_info(&self) -> Result<NodeInfo> {
        let result = self.call("get_info", json!({})).await?;
        serde_json::from_value(result).map_err(|e| Error::rpc_schema("get_info", e.to_string()))
    }

    /// `get_version`, returning the packed version number
    pub async fn get_version(&self) -> Result<u64> {
        let result = self.call("get_version", json!({})).await?;
        let status = result.get("status").and_then(Value::as_str).unwrap_or("");
        if status != "OK" {
            return Err(Error::rpc_daemon("get_version", status));
        }
        result
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::rpc_schema("get_version", "missing version"))
    }

    /// `get_miner_data`
    pub async fn get_miner_data(&self) -> Result<MinerData> {
        let result = self.call("get_miner_data", json!({})).await?;
        parse_miner_data(&result)
    }

    /// `get_block_header_by_height`
    pub async fn get_block_header_by_height(&self, height: u64) -> Result<MainChainHeader> {
        let result = self
            .call("get_block_header_by_height", json!({ "height": height }))
            .await?;
        let header = result
            .get("block_header")
            .ok_or_else(|| Error::rpc_schema("get_block_header_by_height", "missing header"))?;
        parse_block_header(header)
    }

    /// `get_block_headers_range`, inclusive on both ends
    pub async fn get_block_headers_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<Vec<MainChainHeader>> {
        let result = self
            .call(
                "get_block_headers_range",
                json!({ "start_height": start_height, "end_height": end_height }),
            )
            .await?;
        let headers = result
            .get("headers")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::rpc_schema("get_block_headers_range", "missing headers"))?;

        let mut parsed = Vec::with_capacity(headers.len());
        for h in headers {
            match parse_block_header(h) {
                Ok(header) => parsed.push(header),
                // a single bad record is dropped, the rest still count
                Err(e) => warn!("skipping unparseable block header: {}", e),
            }
        }
        info!("downloaded {} block headers", parsed.len());
        Ok(parsed)
    }

    /// `submit_block` with a hex blob; returns the daemon status string
    pub async fn submit_block(&self, blob_hex: &str) -> Result<String> {
        let result = self.call("submit_block", json!([blob_hex])).await?;
        Ok(result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string())
    }
}

/// Difficulty appears as a number, a decimal string, a `0x` hex string, or
/// a (`difficulty`, `difficulty_top64`) pair depending on the endpoint.
fn parse_difficulty_value(v: &Value) -> Option<Difficulty> {
    match v {
        Value::Number(n) => n.as_u64().map(|x| Difficulty::new(x as u128)),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                u128::from_str_radix(hex, 16).ok().map(Difficulty::new)
            } else {
                s.parse::<u128>().ok().map(Difficulty::new)
            }
        }
        _ => None,
    }
}

fn parse_hash_field(v: &Value, field: &str) -> Result<Hash> {
    v.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::rpc_schema("hash", format!("missing {}", field)))
        .and_then(Hash::from_hex)
}

fn parse_block_header(v: &Value) -> Result<MainChainHeader> {
    let lo = v.get("difficulty").and_then(Value::as_u64);
    let hi = v.get("difficulty_top64").and_then(Value::as_u64);
    let difficulty = match (lo, hi) {
        (Some(lo), hi) => Difficulty::from_parts(lo, hi.unwrap_or(0)),
        _ => v
            .get("wide_difficulty")
            .and_then(parse_difficulty_value)
            .ok_or_else(|| Error::rpc_schema("block_header", "unparseable difficulty"))?,
    };

    Ok(MainChainHeader {
        height: v
            .get("height")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::rpc_schema("block_header", "missing height"))?,
        id: parse_hash_field(v, "hash")?,
        difficulty,
        timestamp: v.get("timestamp").and_then(Value::as_u64).unwrap_or(0),
        reward: v.get("reward").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// Parse a `get_miner_data` result (also the ZMQ `full-miner_data` body)
pub fn parse_miner_data(v: &Value) -> Result<MinerData> {
    let difficulty = v
        .get("difficulty")
        .and_then(parse_difficulty_value)
        .ok_or_else(|| Error::rpc_schema("get_miner_data", "unparseable difficulty"))?;

    let mut tx_backlog = Vec::new();
    if let Some(backlog) = v.get("tx_backlog").and_then(Value::as_array) {
        for tx in backlog {
            let (Some(id), Some(weight), Some(fee)) = (
                tx.get("id").and_then(Value::as_str),
                tx.get("weight").and_then(Value::as_u64),
                tx.get("fee").and_then(Value::as_u64),
            ) else {
                continue;
            };
            let Ok(id) = Hash::from_hex(id) else { continue };
            tx_backlog.push(TxEntry {
                id,
                blob_size: 0,
                weight,
                fee,
            });
        }
    }

    Ok(MinerData {
        major_version: v
            .get("major_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::rpc_schema("get_miner_data", "missing major_version"))?
            as u8,
        height: v
            .get("height")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::rpc_schema("get_miner_data", "missing height"))?,
        prev_id: parse_hash_field(v, "prev_id")?,
        seed_hash: parse_hash_field(v, "seed_hash")?,
        difficulty,
        median_weight: v
            .get("median_weight")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        already_generated_coins: v
            .get("already_generated_coins")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        tx_backlog,
    })
}
