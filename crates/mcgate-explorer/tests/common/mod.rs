//! Scripted in-memory MultiChain daemon for gateway and registry tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use mcgate_core::cache::{CacheConfig, ResponseCache};
use mcgate_core::error::TransportError;
use mcgate_core::request::{JsonRpcRequest, JsonRpcResponse};
use mcgate_core::transport::RpcTransport;
use mcgate_explorer::{Gateway, MethodTable, TtlPolicy};

/// What the daemon answers to one call.
pub enum Reply {
    Ok(Value),
    Rpc(i64, &'static str),
    Fail(TransportError),
}

type Handler = dyn Fn(&str, &[Value]) -> Reply + Send + Sync;

pub struct MockDaemon {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    delay: Duration,
    slow: Mutex<Vec<(String, Duration)>>,
}

impl MockDaemon {
    pub fn new(handler: impl Fn(&str, &[Value]) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, handler)
    }

    /// Every answer is held back by `delay`.
    pub fn with_delay(
        delay: Duration,
        handler: impl Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            delay,
            slow: Mutex::new(Vec::new()),
        })
    }

    /// Hold back answers to `method` by `delay` instead of the default.
    pub fn set_slow(&self, method: &str, delay: Duration) {
        self.slow.lock().push((method.to_string(), delay));
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Parameters of every call to `method`, oldest first.
    pub fn params(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl RpcTransport for MockDaemon {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.calls.lock().push((req.method.clone(), req.params.clone()));
        let delay = self
            .slow
            .lock()
            .iter()
            .find(|(m, _)| *m == req.method)
            .map_or(self.delay, |(_, d)| *d);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match (self.handler)(&req.method, &req.params) {
            Reply::Ok(result) => Ok(JsonRpcResponse::success(req.id, result)),
            Reply::Rpc(code, message) => Ok(JsonRpcResponse::failure(req.id, code, message)),
            Reply::Fail(e) => Err(e),
        }
    }

    fn url(&self) -> &str {
        "mock://daemon"
    }
}

pub fn gateway(daemon: Arc<MockDaemon>) -> Gateway {
    Gateway::new(
        "chain1",
        daemon,
        ResponseCache::new("chain1", CacheConfig::default()),
        MethodTable::default(),
        TtlPolicy::default(),
    )
}

pub fn refused() -> TransportError {
    TransportError::Connect {
        endpoint: "mock://daemon".into(),
        reason: "connection refused".into(),
    }
}

/// 64-hex id derived from `n`.
pub fn hex64(prefix: char, n: u64) -> String {
    format!("{prefix}{:063x}", n)
}

pub fn getinfo(height: u64) -> Value {
    json!({
        "version": "2.3.3",
        "chainname": "chain1",
        "description": "MultiChain chain1",
        "protocol": "multichain",
        "blocks": height,
        "connections": 0
    })
}

pub fn block(height: u64) -> Value {
    json!({
        "hash": hex64('b', height),
        "miner": "1MinerAddressXXXXXXXXXXXXXXXXX",
        "confirmations": 1,
        "height": height,
        "version": 3,
        "merkleroot": hex64('e', height),
        "tx": [hex64('a', height)],
        "time": 1_700_000_000u64 + height,
        "nonce": 7
    })
}

pub fn block_summary(height: u64) -> Value {
    json!({
        "hash": hex64('b', height),
        "height": height,
        "miner": "1MinerAddressXXXXXXXXXXXXXXXXX",
        "confirmations": 1,
        "time": 1_700_000_000u64 + height,
        "txcount": 1
    })
}

pub fn asset(i: usize) -> Value {
    json!({
        "name": format!("asset{i}"),
        "issuetxid": hex64('c', i as u64),
        "assetref": format!("{}-266-{}", 10 + i, 1000 + i),
        "multiple": 1,
        "units": 1,
        "open": false,
        "issueqty": 1000
    })
}

pub fn stream(name: &str) -> Value {
    json!({
        "name": name,
        "createtxid": hex64('d', 1),
        "streamref": "3-267-1",
        "open": true,
        "items": 2,
        "keys": 1,
        "publishers": 1
    })
}

/// Window of `all` the way MultiChain reads `(count, start)`: a negative
/// start counts back from the end.
pub fn window(all: &[Value], params: &[Value], count_at: usize) -> Value {
    let count = params.get(count_at).and_then(Value::as_u64).unwrap_or(10) as usize;
    let start = params.get(count_at + 1).and_then(Value::as_i64).unwrap_or(0);
    let len = all.len() as i64;
    let from = if start < 0 { (len + start).max(0) } else { start.min(len) } as usize;
    let to = (from + count).min(all.len());
    Value::Array(all[from..to].to_vec())
}
