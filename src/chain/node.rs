//! Read-only L2 node client over JSON-RPC
//!
//! The node returns loosely typed values (numbers, decimal strings, hex strings)
//! for block numbers and leaf indices. All coercion happens in [`coerce_u64`] and
//! [`parse_witness`] so the rest of the crate sees typed values only.

use super::{InclusionWitness, MessageSource};
use crate::error::{BridgeError, BridgeResult};
use crate::field::Fr;

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// L2 node JSON-RPC client with failover across node URLs
pub struct NodeRpcClient {
    nodes: Vec<Provider<Http>>,
    current: AtomicUsize,
}

impl NodeRpcClient {
    pub fn new(urls: &[String]) -> BridgeResult<Self> {
        let mut nodes = Vec::new();
        for url in urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    nodes.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added L2 node {}", url);
                }
                Err(e) => warn!("Failed to create L2 node client for {}: {}", url, e),
            }
        }

        if nodes.is_empty() {
            return Err(BridgeError::Config("No valid L2 node URLs".to_string()));
        }

        Ok(Self {
            nodes,
            current: AtomicUsize::new(0),
        })
    }

    fn node(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.nodes[idx % self.nodes.len()]
    }

    fn failover(&self) {
        let next = (self.current.load(Ordering::Relaxed) + 1) % self.nodes.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("L2 node failover to {}", next);
    }

    async fn request(&self, method: &str, params: Value) -> BridgeResult<Value> {
        let mut last_error = None;
        for _ in 0..self.nodes.len() {
            match self.node().request::<Value, Value>(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("L2 node call {} failed: {}", method, e);
                    last_error = Some(e.to_string());
                    self.failover();
                }
            }
        }

        Err(BridgeError::Network(format!(
            "{}: {}",
            method,
            last_error.unwrap_or_else(|| "no node available".to_string())
        )))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        self.get_block_number().await.is_ok()
    }
}

#[async_trait]
impl MessageSource for NodeRpcClient {
    async fn get_block_number(&self) -> BridgeResult<u64> {
        let value = self.request("node_getBlockNumber", json!([])).await?;
        coerce_u64(&value)
    }

    async fn is_message_included(&self, message_key: &Fr) -> BridgeResult<Option<u64>> {
        let value = self
            .request("node_getL1ToL2MessageBlock", json!([message_key.to_string()]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        coerce_u64(&value).map(Some)
    }

    async fn get_inclusion_witness(
        &self,
        at_block: u64,
        message_key: &Fr,
    ) -> BridgeResult<Option<InclusionWitness>> {
        let value = self
            .request(
                "node_getL1ToL2MessageMembershipWitness",
                json!([at_block, message_key.to_string()]),
            )
            .await?;
        parse_witness(&value)
    }

    async fn get_outbox_witness(
        &self,
        l2_block: u64,
        message: &Fr,
    ) -> BridgeResult<Option<InclusionWitness>> {
        let value = self
            .request(
                "node_getL2ToL1MessageMembershipWitness",
                json!([l2_block, message.to_string()]),
            )
            .await?;
        parse_witness(&value)
    }
}

/// Coerce a JSON number, decimal string or 0x-hex string into a u64
pub fn coerce_u64(value: &Value) -> BridgeResult<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| BridgeError::Encoding(format!("not an unsigned integer: {}", n))),
        Value::String(s) => {
            let s = s.trim();
            let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16)
            } else {
                s.parse::<u64>()
            };
            parsed.map_err(|e| BridgeError::Encoding(format!("invalid integer {:?}: {}", s, e)))
        }
        other => Err(BridgeError::Encoding(format!(
            "expected integer, got {}",
            other
        ))),
    }
}

/// Leaf index from whatever shape the node used
pub fn parse_leaf_index(value: &Value) -> BridgeResult<u64> {
    coerce_u64(value)
}

/// Decode `[leafIndex, siblingPath]` or `{leafIndex, siblingPath}`; null means absent
pub fn parse_witness(value: &Value) -> BridgeResult<Option<InclusionWitness>> {
    let (index, path) = match value {
        Value::Null => return Ok(None),
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        Value::Object(map) => {
            let index = map
                .get("leafIndex")
                .or_else(|| map.get("index"))
                .ok_or_else(|| BridgeError::Encoding("witness without leaf index".into()))?;
            let path = map
                .get("siblingPath")
                .or_else(|| map.get("path"))
                .ok_or_else(|| BridgeError::Encoding("witness without sibling path".into()))?;
            (index, path)
        }
        other => {
            return Err(BridgeError::Encoding(format!(
                "unexpected witness shape: {}",
                other
            )))
        }
    };

    let leaf_index = parse_leaf_index(index)?;
    let sibling_path = match path {
        Value::Array(nodes) => nodes
            .iter()
            .map(|node| match node {
                Value::String(s) => Fr::from_str(s),
                other => Err(BridgeError::Encoding(format!(
                    "sibling path entry is not a hex string: {}",
                    other
                ))),
            })
            .collect::<BridgeResult<Vec<_>>>()?,
        other => {
            return Err(BridgeError::Encoding(format!(
                "sibling path is not a list: {}",
                other
            )))
        }
    };

    Ok(Some(InclusionWitness {
        leaf_index,
        sibling_path,
    }))
}
