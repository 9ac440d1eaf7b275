//! Typed explorer operations over one chain's daemon.
//!
//! The gateway is the only component that knows RPC method names and
//! parameter shapes. Every operation validates its inputs, goes through the
//! chain's [`ResponseCache`], and decodes into the types in
//! [`crate::types`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use mcgate_core::cache::{CacheKey, ResponseCache};
use mcgate_core::error::TransportError;
use mcgate_core::transport::{HealthStatus, RpcTransport};

use crate::error::{EntityKind, ExplorerError};
use crate::methods::{MethodTable, Operation, TtlClass, TtlPolicy};
use crate::types::{
    AddressInfo, Asset, AssetBalance, Block, BlockSummary, ChainInfo, LedgerEntry, Order, Page,
    PageRequest, Permission, SearchHit, Stream, StreamItem, StreamKeySummary,
    StreamPublisherSummary, Transaction,
};
use crate::validation;

/// Cache of raw daemon results shared by a chain's gateway.
pub type GatewayCache = ResponseCache<Value, ExplorerError>;

/// `count` used where the daemon has no cheap offset from the oldest entry
/// and the whole listing is fetched instead.
const ALL_ITEMS: u64 = 9_999_999;

/// Outcome of [`Gateway::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub chain: String,
    pub healthy: bool,
    pub height: Option<u64>,
    pub latency_ms: u64,
    pub transport: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct GatewayInner {
    chain: String,
    transport: Arc<dyn RpcTransport>,
    cache: GatewayCache,
    methods: MethodTable,
    ttl: TtlPolicy,
    next_id: AtomicU64,
    /// Issue order of fresh `getinfo` calls.
    info_seq: AtomicU64,
    head: Mutex<Head>,
}

/// Last applied chain tip and the issue number of the `getinfo` it came from.
#[derive(Default)]
struct Head {
    height: Option<u64>,
    seq: u64,
}

impl GatewayInner {
    /// One uncached daemon call, with not-found codes mapped.
    async fn rpc(&self, op: Operation, subject: &str, params: Vec<Value>) -> Result<Value, ExplorerError> {
        let method = self.methods.method(op);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.transport.call_value(id, method, params).await {
            Ok(value) => Ok(value),
            Err(TransportError::Rpc(e)) if self.methods.is_not_found(e.code) => {
                tracing::debug!(chain = %self.chain, method, code = e.code, subject, "daemon reports not found");
                Err(ExplorerError::not_found(op.entity(), subject))
            }
            Err(e) => Err(ExplorerError::from_transport(method, e)),
        }
    }

    /// Uncached `getinfo` whose answer is applied to the tracked tip.
    /// Returns `false` alongside the value when a later-issued `getinfo`
    /// has already been applied.
    async fn fresh_info(&self) -> Result<(Value, bool), ExplorerError> {
        let seq = self.info_seq.fetch_add(1, Ordering::Relaxed);
        let value = self.rpc(Operation::GetInfo, &self.chain, vec![]).await?;
        let current = match value.get("blocks").and_then(Value::as_u64) {
            Some(height) => self.observe_height(seq, height),
            None => true,
        };
        Ok((value, current))
    }

    /// Track the chain tip; a higher tip invalidates height-dependent
    /// listings, a lower one (reorganisation) drops the whole chain cache.
    /// Answers issued before the last applied one are ignored.
    fn observe_height(&self, seq: u64, height: u64) -> bool {
        let previous = {
            let mut head = self.head.lock();
            if seq <= head.seq {
                tracing::debug!(chain = %self.chain, height, seq, applied = head.seq, "ignoring out-of-order getinfo");
                return false;
            }
            head.seq = seq;
            head.height.replace(height)
        };
        match previous {
            Some(prev) if height > prev => {
                let prefixes: BTreeSet<String> = Operation::ALL
                    .into_iter()
                    .filter(|op| *op != Operation::GetInfo && op.ttl_class() != TtlClass::Immutable)
                    .map(|op| CacheKey::method_prefix(&self.chain, self.methods.method(op)))
                    .collect();
                let removed: u64 = prefixes
                    .iter()
                    .map(|prefix| self.cache.invalidate_prefix(prefix))
                    .sum();
                tracing::debug!(chain = %self.chain, height, previous = prev, removed, "new block");
            }
            Some(prev) if height < prev => {
                tracing::warn!(chain = %self.chain, height, previous = prev, "chain tip moved back, dropping cache");
                self.cache
                    .invalidate_prefix(&CacheKey::chain_prefix(&self.chain));
            }
            _ => {}
        }
        true
    }

    fn decode<T: DeserializeOwned>(&self, op: Operation, value: Value) -> Result<T, ExplorerError> {
        serde_json::from_value(value).map_err(|e| ExplorerError::Decode {
            method: self.methods.method(op).to_string(),
            reason: e.to_string(),
        })
    }
}

/// Typed, cached operations for one chain. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("chain", &self.inner.chain)
            .field("transport", &self.inner.transport.url())
            .finish()
    }
}

impl Gateway {
    pub fn new(
        chain: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
        cache: GatewayCache,
        methods: MethodTable,
        ttl: TtlPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                chain: chain.into(),
                transport,
                cache,
                methods,
                ttl,
                next_id: AtomicU64::new(1),
                info_seq: AtomicU64::new(1),
                head: Mutex::new(Head::default()),
            }),
        }
    }

    pub fn chain(&self) -> &str {
        &self.inner.chain
    }

    pub fn cache(&self) -> &GatewayCache {
        &self.inner.cache
    }

    pub fn methods(&self) -> &MethodTable {
        &self.inner.methods
    }

    /// Chain tip seen by the most recent fresh `getinfo`.
    pub fn last_height(&self) -> Option<u64> {
        self.inner.head.lock().height
    }

    /// Cached daemon call returning the raw result.
    async fn fetch(&self, op: Operation, subject: impl Into<String>, params: Vec<Value>) -> Result<Value, ExplorerError> {
        let inner = Arc::clone(&self.inner);
        let key = CacheKey::new(&inner.chain, inner.methods.method(op), &params);
        let ttl = inner.ttl.for_op(op);
        let subject = subject.into();
        self.inner
            .cache
            .get_or_load(&key, ttl, move || async move {
                if op == Operation::GetInfo {
                    return inner.fresh_info().await.map(|(value, _)| value);
                }
                inner.rpc(op, &subject, params).await
            })
            .await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        op: Operation,
        subject: &str,
        params: Vec<Value>,
    ) -> Result<T, ExplorerError> {
        let value = self.fetch(op, subject, params).await?;
        self.inner.decode(op, value)
    }

    /// Single-entity lookup: a `null` result means the entity is absent.
    async fn get_entity<T: DeserializeOwned>(
        &self,
        op: Operation,
        subject: &str,
        params: Vec<Value>,
    ) -> Result<T, ExplorerError> {
        let value = self.fetch(op, subject, params).await?;
        if value.is_null() {
            return Err(ExplorerError::not_found(op.entity(), subject));
        }
        self.inner.decode(op, value)
    }

    /// First element of a filtered listing, or not found.
    async fn first_of<T: DeserializeOwned>(
        &self,
        op: Operation,
        subject: &str,
        params: Vec<Value>,
    ) -> Result<T, ExplorerError> {
        let items: Vec<T> = self.get(op, subject, params).await?;
        items
            .into_iter()
            .next()
            .ok_or_else(|| ExplorerError::not_found(op.entity(), subject))
    }

    /// Paged listing for methods taking `(count, start)` where a negative
    /// start counts from the newest entry.
    async fn windowed<T, F>(
        &self,
        op: Operation,
        subject: &str,
        page: &PageRequest,
        params: F,
    ) -> Result<Page<T>, ExplorerError>
    where
        T: DeserializeOwned,
        F: Fn(usize, i64) -> Vec<Value>,
    {
        let page = validation::page(page)?;
        match page.order {
            Order::Asc => {
                let items: Vec<T> = self
                    .get(op, subject, params(page.count + 1, page.offset as i64))
                    .await?;
                Ok(Page::from_surplus(items, page.offset, page.count))
            }
            Order::Desc => {
                // The tail window covers everything up to the end of this
                // page plus one surplus entry.
                let window = page.offset + page.count + 1;
                let items: Vec<T> = self
                    .get(op, subject, params(window, -(window as i64)))
                    .await?;
                Ok(Page::slice(items, &page))
            }
        }
    }

    // ── chain ────────────────────────────────────────────────────────────

    pub async fn chain_info(&self) -> Result<ChainInfo, ExplorerError> {
        self.get(Operation::GetInfo, self.chain(), vec![]).await
    }

    /// Uncached `getinfo`; updates the observed tip and the cached copy.
    pub async fn refresh_head(&self) -> Result<ChainInfo, ExplorerError> {
        let inner = &self.inner;
        let (value, current) = inner.fresh_info().await?;
        if current {
            let key = CacheKey::new(&inner.chain, inner.methods.method(Operation::GetInfo), &[]);
            inner
                .cache
                .insert(&key, value.clone(), inner.ttl.for_op(Operation::GetInfo));
        }
        inner.decode(Operation::GetInfo, value)
    }

    /// Probe the daemon with an uncached `getinfo`. Never fails; the
    /// outcome is in the report.
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let result = self.refresh_head().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let transport = self.inner.transport.health();
        match result {
            Ok(info) => HealthReport {
                chain: self.inner.chain.clone(),
                healthy: true,
                height: Some(info.blocks),
                latency_ms,
                transport,
                error: None,
            },
            Err(e) => {
                tracing::warn!(chain = %self.inner.chain, error = %e, "health check failed");
                HealthReport {
                    chain: self.inner.chain.clone(),
                    healthy: false,
                    height: self.last_height(),
                    latency_ms,
                    transport,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    // ── blocks and transactions ──────────────────────────────────────────

    pub async fn get_block_hash(&self, height: u64) -> Result<String, ExplorerError> {
        let height = validation::height(height)?;
        self.get_entity(Operation::GetBlockHash, &height.to_string(), vec![json!(height)])
            .await
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Block, ExplorerError> {
        let hash = validation::block_hash(hash)?;
        self.get_entity(Operation::GetBlock, &hash, vec![json!(hash), json!(1)])
            .await
    }

    pub async fn get_block_by_height(&self, height: u64) -> Result<Block, ExplorerError> {
        let hash = self.get_block_hash(height).await?;
        self.get_block_by_hash(&hash).await
    }

    pub async fn get_transaction(&self, txid: &str) -> Result<Transaction, ExplorerError> {
        let txid = validation::txid(txid)?;
        self.get_entity(Operation::GetRawTransaction, &txid, vec![json!(txid), json!(1)])
            .await
    }

    /// Blocks by height. Ranges are computed from the current tip, so no
    /// surplus entry is needed.
    pub async fn list_blocks(&self, page: &PageRequest) -> Result<Page<BlockSummary>, ExplorerError> {
        let page = validation::page(page)?;
        let tip = self.chain_info().await?.blocks;
        let offset = page.offset as u64;
        let count = page.count as u64;
        if offset > tip {
            return Ok(Page::empty(page.offset));
        }
        let (lo, hi, has_more) = match page.order {
            Order::Asc => {
                let hi = (offset + count - 1).min(tip);
                (offset, hi, hi < tip)
            }
            Order::Desc => {
                let hi = tip - offset;
                let lo = hi.saturating_sub(count - 1);
                (lo, hi, lo > 0)
            }
        };
        let range = format!("{lo}-{hi}");
        let mut items: Vec<BlockSummary> = self
            .get(Operation::ListBlocks, &range, vec![json!(range)])
            .await?;
        items.sort_by_key(|b| b.height);
        if page.order == Order::Desc {
            items.reverse();
        }
        Ok(Page {
            items,
            offset: page.offset,
            has_more,
        })
    }

    // ── assets ───────────────────────────────────────────────────────────

    pub async fn list_assets(&self, page: &PageRequest) -> Result<Page<Asset>, ExplorerError> {
        self.windowed(Operation::ListAssets, "*", page, |count, start| {
            vec![json!("*"), json!(true), json!(count), json!(start)]
        })
        .await
    }

    pub async fn get_asset(&self, name: &str) -> Result<Asset, ExplorerError> {
        let name = validation::entity_name("asset", name)?;
        self.first_of(Operation::ListAssets, &name, vec![json!(name), json!(true)])
            .await
    }

    pub async fn list_asset_transactions(
        &self,
        name: &str,
        page: &PageRequest,
    ) -> Result<Page<LedgerEntry>, ExplorerError> {
        let name = validation::entity_name("asset", name)?;
        self.windowed(Operation::ListAssetTransactions, &name, page, |count, start| {
            vec![json!(name), json!(false), json!(count), json!(start)]
        })
        .await
    }

    // ── streams ──────────────────────────────────────────────────────────

    pub async fn list_streams(&self, page: &PageRequest) -> Result<Page<Stream>, ExplorerError> {
        self.windowed(Operation::ListStreams, "*", page, |count, start| {
            vec![json!("*"), json!(true), json!(count), json!(start)]
        })
        .await
    }

    pub async fn get_stream(&self, name: &str) -> Result<Stream, ExplorerError> {
        let name = validation::entity_name("stream", name)?;
        self.first_of(Operation::ListStreams, &name, vec![json!(name), json!(true)])
            .await
    }

    pub async fn list_stream_items(
        &self,
        stream: &str,
        page: &PageRequest,
    ) -> Result<Page<StreamItem>, ExplorerError> {
        let stream = validation::entity_name("stream", stream)?;
        self.windowed(Operation::ListStreamItems, &stream, page, |count, start| {
            vec![json!(stream), json!(false), json!(count), json!(start)]
        })
        .await
    }

    pub async fn list_stream_keys(
        &self,
        stream: &str,
        page: &PageRequest,
    ) -> Result<Page<StreamKeySummary>, ExplorerError> {
        let stream = validation::entity_name("stream", stream)?;
        self.windowed(Operation::ListStreamKeys, &stream, page, |count, start| {
            vec![json!(stream), json!("*"), json!(false), json!(count), json!(start)]
        })
        .await
    }

    pub async fn list_stream_publishers(
        &self,
        stream: &str,
        page: &PageRequest,
    ) -> Result<Page<StreamPublisherSummary>, ExplorerError> {
        let stream = validation::entity_name("stream", stream)?;
        self.windowed(Operation::ListStreamPublishers, &stream, page, |count, start| {
            vec![json!(stream), json!("*"), json!(false), json!(count), json!(start)]
        })
        .await
    }

    pub async fn list_stream_key_items(
        &self,
        stream: &str,
        key: &str,
        page: &PageRequest,
    ) -> Result<Page<StreamItem>, ExplorerError> {
        let stream = validation::entity_name("stream", stream)?;
        let key = validation::stream_key("key", key)?;
        let subject = format!("{stream}/{key}");
        self.windowed(Operation::ListStreamKeyItems, &subject, page, |count, start| {
            vec![json!(stream), json!(key), json!(false), json!(count), json!(start)]
        })
        .await
    }

    pub async fn list_stream_publisher_items(
        &self,
        stream: &str,
        publisher: &str,
        page: &PageRequest,
    ) -> Result<Page<StreamItem>, ExplorerError> {
        let stream = validation::entity_name("stream", stream)?;
        let publisher = validation::address(publisher)?;
        let subject = format!("{stream}/{publisher}");
        self.windowed(Operation::ListStreamPublisherItems, &subject, page, |count, start| {
            vec![json!(stream), json!(publisher), json!(false), json!(count), json!(start)]
        })
        .await
    }

    // ── addresses and permissions ────────────────────────────────────────

    pub async fn get_address_balances(&self, address: &str) -> Result<Vec<AssetBalance>, ExplorerError> {
        let address = validation::address(address)?;
        self.get(
            Operation::GetAddressBalances,
            &address,
            vec![json!(address), json!(0), json!(true)],
        )
        .await
    }

    /// Newest-first pages use the daemon's `skip`; oldest-first pages need
    /// the full history and slice it.
    pub async fn list_address_transactions(
        &self,
        address: &str,
        page: &PageRequest,
    ) -> Result<Page<LedgerEntry>, ExplorerError> {
        let address = validation::address(address)?;
        let page = validation::page(page)?;
        let op = Operation::ListAddressTransactions;
        match page.order {
            Order::Desc => {
                let params = vec![
                    json!(address),
                    json!(page.count + 1),
                    json!(page.offset),
                    json!(false),
                ];
                let mut items: Vec<LedgerEntry> = self.get(op, &address, params).await?;
                items.reverse();
                Ok(Page::from_surplus(items, page.offset, page.count))
            }
            Order::Asc => {
                let params = vec![json!(address), json!(ALL_ITEMS), json!(0), json!(false)];
                let items: Vec<LedgerEntry> = self.get(op, &address, params).await?;
                Ok(Page::slice(items, &page))
            }
        }
    }

    /// Wallet addresses of the node.
    pub async fn list_addresses(&self) -> Result<Vec<AddressInfo>, ExplorerError> {
        self.get(Operation::ListAddresses, "*", vec![json!("*"), json!(true)])
            .await
    }

    /// Permissions of one type (or `*`); the daemon has no paging for
    /// these, so pages are cut from the full list.
    pub async fn list_permissions(
        &self,
        kind: &str,
        page: &PageRequest,
    ) -> Result<Page<Permission>, ExplorerError> {
        let kind = validation::permission_type(kind)?;
        let page = validation::page(page)?;
        let all: Vec<Permission> = self
            .get(Operation::ListPermissions, &kind, vec![json!(kind)])
            .await?;
        Ok(Page::slice(all, &page))
    }

    pub async fn list_address_permissions(&self, address: &str) -> Result<Vec<Permission>, ExplorerError> {
        let address = validation::address(address)?;
        self.get(
            Operation::ListPermissions,
            &address,
            vec![json!("*"), json!(address)],
        )
        .await
    }

    // ── search ───────────────────────────────────────────────────────────

    /// Resolve a free-form query against every entity kind its shape allows:
    /// a number as a block height, 64 hex characters as a block hash and a
    /// txid, then address, asset and stream names. Hits come back in that
    /// order.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ExplorerError> {
        let q = validation::search_query(query)?;
        let mut hits = Vec::new();

        if q.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(height) = q.parse::<u64>() {
                if height <= validation::MAX_HEIGHT {
                    if let Some(block) = found(self.get_block_by_height(height).await)? {
                        hits.push(block_hit(&block));
                    }
                }
            }
        }

        if q.len() == 64 && q.bytes().all(|b| b.is_ascii_hexdigit()) {
            if let Some(block) = found(self.get_block_by_hash(&q).await)? {
                hits.push(block_hit(&block));
            }
            if let Some(tx) = found(self.get_transaction(&q).await)? {
                hits.push(SearchHit {
                    kind: EntityKind::Transaction,
                    label: format!("Transaction {}", tx.txid),
                    id: tx.txid,
                });
            }
        }

        if validation::is_address_shaped(&q) {
            if let Some(balances) = found(self.get_address_balances(&q).await)? {
                hits.push(SearchHit {
                    kind: EntityKind::Address,
                    id: q.clone(),
                    label: format!("Address {q} ({} balances)", balances.len()),
                });
            }
        }
        if validation::is_name_shaped(&q) {
            if let Some(asset) = found(self.get_asset(&q).await)? {
                hits.push(SearchHit {
                    kind: EntityKind::Asset,
                    id: asset.label().to_string(),
                    label: format!("Asset {}", asset.label()),
                });
            }
            if let Some(stream) = found(self.get_stream(&q).await)? {
                hits.push(SearchHit {
                    kind: EntityKind::Stream,
                    label: format!("Stream {}", stream.name),
                    id: stream.name,
                });
            }
        }
        Ok(hits)
    }
}

fn block_hit(block: &Block) -> SearchHit {
    SearchHit {
        kind: EntityKind::Block,
        id: block.hash.clone(),
        label: format!("Block {}", block.height),
    }
}

/// Turn a not-found failure into `None`; other errors pass through.
fn found<T>(result: Result<T, ExplorerError>) -> Result<Option<T>, ExplorerError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
