//! Domain types decoded from MultiChain responses.
//!
//! Each type names the fields the explorer relies on and keeps every other
//! member in `extra`, so encoding a decoded value reproduces the daemon's
//! JSON. Quantities stay `serde_json::Number` to preserve their integer or
//! decimal form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::EntityKind;

type Extra = Map<String, Value>;

/// `getinfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chainname: String,
    /// Height of the chain tip.
    pub blocks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocolversion: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `getblock <hash> 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    /// Negative for blocks that left the main chain.
    pub confirmations: i64,
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previousblockhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nextblockhash: Option<String>,
    /// Transaction ids.
    pub tx: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `listblocks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub hash: String,
    pub height: u64,
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txcount: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `getrawtransaction <txid> 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub vin: Vec<Value>,
    pub vout: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Transaction {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations.unwrap_or(0) > 0
    }
}

/// One entry of `listassets <name|*> true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Unnamed assets report `null`.
    pub name: Option<String>,
    pub issuetxid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assetref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issueqty: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Number>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Asset {
    /// Name, or the asset reference for unnamed assets.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.assetref.as_deref())
            .unwrap_or(&self.issuetxid)
    }
}

/// One entry of `getaddressbalances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assetref: Option<String>,
    pub qty: Number,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `liststreams <name|*> true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub createtxid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishers: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `liststreamitems` and its key/publisher-filtered variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    pub txid: String,
    pub publishers: Vec<String>,
    /// Older protocol versions report a single `key` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocktime: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `liststreamkeys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamKeySummary {
    pub key: String,
    pub items: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `liststreampublishers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPublisherSummary {
    pub publisher: String,
    pub items: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `listassettransactions` or `listaddresstransactions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocktime: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `listaddresses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ismine: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One entry of `listpermissions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub address: String,
    #[serde(rename = "type")]
    pub permission: String,
    /// Entity the permission is scoped to; `null` for global permissions.
    #[serde(rename = "for", default)]
    pub scope: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startblock: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endblock: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Direction of a paged listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Oldest first.
    #[default]
    Asc,
    /// Newest first.
    Desc,
}

/// Which slice of a listing to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub offset: usize,
    pub count: usize,
    pub order: Order,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            count: 20,
            order: Order::Asc,
        }
    }
}

impl PageRequest {
    pub fn new(offset: usize, count: usize) -> Self {
        Self {
            offset,
            count,
            order: Order::Asc,
        }
    }

    /// The newest `count` entries, newest first.
    pub fn latest(count: usize) -> Self {
        Self {
            offset: 0,
            count,
            order: Order::Desc,
        }
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// The page after this one.
    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.count,
            ..*self
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: usize,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty(offset: usize) -> Self {
        Self {
            items: Vec::new(),
            offset,
            has_more: false,
        }
    }

    /// Page out of a window fetched with one surplus item: the surplus
    /// proves there is more and is dropped.
    pub fn from_surplus(mut items: Vec<T>, offset: usize, count: usize) -> Self {
        let has_more = items.len() > count;
        items.truncate(count);
        Self {
            items,
            offset,
            has_more,
        }
    }

    /// Page out of a complete listing, in the requested order.
    pub fn slice(mut all: Vec<T>, page: &PageRequest) -> Self {
        if page.order == Order::Desc {
            all.reverse();
        }
        let has_more = all.len() > page.offset + page.count;
        let items = all.into_iter().skip(page.offset).take(page.count).collect();
        Self {
            items,
            offset: page.offset,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            offset: self.offset,
            has_more: self.has_more,
        }
    }
}

/// One result of [`Gateway::search`](crate::gateway::Gateway::search).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub kind: EntityKind,
    /// Identifier usable with the matching lookup (height, hash, txid, name, address).
    pub id: String,
    pub label: String,
}
