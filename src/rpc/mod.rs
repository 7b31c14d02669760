//! Cached RPC transport wrapper.
//!
//! Wraps an [`RpcTransport`] and memoizes the fixed set of side-effect-free
//! methods (`eth_call`, `eth_getBalance`, `eth_getCode`,
//! `eth_getStorageAt`) keyed by `(chainId, blockNumber, key)`, persisting
//! through an [`RpcCacheStore`] the same way [`crate::store`] persists
//! entity rows — a small async trait with Postgres/SQLite implementations
//! sharing the connection pool type.

pub mod cache_store;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use cache_store::RpcCacheStore;

use crate::error::{TransportError, TransportResult};
use crate::queue::{RpcRequest, RpcTransport};

/// `2^256 - 1`, decimal. The block number stored for the `"latest"` tag so
/// it sorts after every concrete historical block number.
pub const LATEST_BLOCK_SENTINEL: &str =
    "115792089237316195423570985008687907853269984665640564039457584007913129639935";

const CACHEABLE_METHODS: &[&str] = &["eth_call", "eth_getBalance", "eth_getCode", "eth_getStorageAt"];

/// Build the cache key tail for a cacheable method,
/// or `None` if `method` isn't one of the cacheable methods.
#[must_use]
pub fn cache_key(method: &str, params: &Value) -> Option<String> {
    let args = params.as_array()?;
    match method {
        "eth_call" => {
            let call = args.first()?.as_object()?;
            let to = call.get("to")?.as_str()?.to_lowercase();
            let data = call.get("data").and_then(Value::as_str).unwrap_or("0x").to_lowercase();
            Some(format!("call_{to}_{data}"))
        }
        "eth_getBalance" => {
            let addr = args.first()?.as_str()?.to_lowercase();
            Some(format!("balance_{addr}"))
        }
        "eth_getCode" => {
            let addr = args.first()?.as_str()?.to_lowercase();
            Some(format!("code_{addr}"))
        }
        "eth_getStorageAt" => {
            let addr = args.first()?.as_str()?.to_lowercase();
            let slot = args.get(1)?.as_str()?.to_lowercase();
            Some(format!("storage_{addr}_{slot}"))
        }
        _ => None,
    }
}

/// Normalize the trailing block-tag argument: a hex number decodes to its
/// decimal value; the string `"latest"` maps to [`LATEST_BLOCK_SENTINEL`] so
/// "latest" reads never collide with historical ones yet sort after them.
#[must_use]
pub fn normalize_block_arg(params: &Value) -> Option<String> {
    let args = params.as_array()?;
    let tag = args.last()?.as_str()?;
    Some(normalize_block_tag(tag))
}

#[must_use]
pub fn normalize_block_tag(tag: &str) -> String {
    if tag == "latest" {
        return LATEST_BLOCK_SENTINEL.to_string();
    }
    if let Some(hex) = tag.strip_prefix("0x").or_else(|| tag.strip_prefix("0X")) {
        if let Ok(n) = u128::from_str_radix(hex, 16) {
            return n.to_string();
        }
    }
    tag.to_string()
}

/// Wraps an inner [`RpcTransport`], memoizing cacheable calls in an
/// [`RpcCacheStore`] keyed by `(chainId, blockNumber, key)`. Non-cacheable
/// methods bypass the cache entirely.
pub struct CachedTransport {
    inner: Arc<dyn RpcTransport>,
    cache: Arc<dyn RpcCacheStore>,
    chain_id: i64,
}

impl CachedTransport {
    #[must_use]
    pub fn new(inner: Arc<dyn RpcTransport>, cache: Arc<dyn RpcCacheStore>, chain_id: i64) -> Self {
        Self { inner, cache, chain_id }
    }
}

#[async_trait]
impl RpcTransport for CachedTransport {
    async fn call(&self, request: &RpcRequest) -> TransportResult<Value> {
        let Some(key) = cache_key(&request.method, &request.params) else {
            return self.inner.call(request).await;
        };
        let Some(block_number) = normalize_block_arg(&request.params) else {
            return self.inner.call(request).await;
        };

        if let Some(cached) = self.cache.get(self.chain_id, &block_number, &key).await? {
            let value: Value = serde_json::from_str(&cached).map_err(|e| TransportError::Other {
                message: format!("corrupt cache entry: {e}"),
            })?;
            return Ok(value);
        }

        let result = self.inner.call(request).await?;
        let text = serde_json::to_string(&result).map_err(|e| TransportError::Other {
            message: format!("failed to serialize cache entry: {e}"),
        })?;
        self.cache.put(self.chain_id, &block_number, &key, &text).await?;
        Ok(result)
    }
}
