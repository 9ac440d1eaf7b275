//! RPC method table and cache TTL policy.
//!
//! [`Operation`] is the closed set of daemon calls the gateway makes. The
//! concrete method names and the codes that mean "not found" come from a
//! [`MethodTable`], so a daemon with a renamed or extended API can be
//! served by configuration alone.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EntityKind;

/// How long a result of a given operation stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Depends on the chain tip (`getinfo`).
    Head,
    /// Content-addressed or buried deep enough not to change.
    Immutable,
    /// Listings that grow with every block.
    Listing,
}

/// Every daemon call the gateway can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetInfo,
    GetBlockHash,
    GetBlock,
    GetRawTransaction,
    ListBlocks,
    ListAssets,
    ListAssetTransactions,
    ListStreams,
    ListStreamItems,
    ListStreamKeys,
    ListStreamPublishers,
    ListStreamKeyItems,
    ListStreamPublisherItems,
    GetAddressBalances,
    ListAddressTransactions,
    ListAddresses,
    ListPermissions,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Self::GetInfo,
        Self::GetBlockHash,
        Self::GetBlock,
        Self::GetRawTransaction,
        Self::ListBlocks,
        Self::ListAssets,
        Self::ListAssetTransactions,
        Self::ListStreams,
        Self::ListStreamItems,
        Self::ListStreamKeys,
        Self::ListStreamPublishers,
        Self::ListStreamKeyItems,
        Self::ListStreamPublisherItems,
        Self::GetAddressBalances,
        Self::ListAddressTransactions,
        Self::ListAddresses,
        Self::ListPermissions,
    ];

    pub fn ttl_class(self) -> TtlClass {
        match self {
            Self::GetInfo => TtlClass::Head,
            Self::GetBlockHash | Self::GetBlock | Self::GetRawTransaction => TtlClass::Immutable,
            _ => TtlClass::Listing,
        }
    }

    /// Entity a "not found" answer to this call refers to.
    pub fn entity(self) -> EntityKind {
        match self {
            Self::GetInfo => EntityKind::Chain,
            Self::GetBlockHash | Self::GetBlock | Self::ListBlocks => EntityKind::Block,
            Self::GetRawTransaction => EntityKind::Transaction,
            Self::ListAssets | Self::ListAssetTransactions => EntityKind::Asset,
            Self::ListStreams
            | Self::ListStreamKeys
            | Self::ListStreamPublishers
            | Self::ListStreamItems => EntityKind::Stream,
            Self::ListStreamKeyItems | Self::ListStreamPublisherItems => EntityKind::StreamItem,
            Self::GetAddressBalances | Self::ListAddressTransactions | Self::ListAddresses => {
                EntityKind::Address
            }
            Self::ListPermissions => EntityKind::Permission,
        }
    }
}

/// RPC method names and not-found codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodTable {
    pub getinfo: String,
    pub getblockhash: String,
    pub getblock: String,
    pub getrawtransaction: String,
    pub listblocks: String,
    pub listassets: String,
    pub listassettransactions: String,
    pub liststreams: String,
    pub liststreamitems: String,
    pub liststreamkeys: String,
    pub liststreampublishers: String,
    pub liststreamkeyitems: String,
    pub liststreampublisheritems: String,
    pub getaddressbalances: String,
    pub listaddresstransactions: String,
    pub listaddresses: String,
    pub listpermissions: String,
    /// Daemon error codes that mean the requested entity does not exist.
    pub not_found_codes: Vec<i64>,
}

impl Default for MethodTable {
    fn default() -> Self {
        Self {
            getinfo: "getinfo".into(),
            getblockhash: "getblockhash".into(),
            getblock: "getblock".into(),
            getrawtransaction: "getrawtransaction".into(),
            listblocks: "listblocks".into(),
            listassets: "listassets".into(),
            listassettransactions: "listassettransactions".into(),
            liststreams: "liststreams".into(),
            liststreamitems: "liststreamitems".into(),
            liststreamkeys: "liststreamkeys".into(),
            liststreampublishers: "liststreampublishers".into(),
            liststreamkeyitems: "liststreamkeyitems".into(),
            liststreampublisheritems: "liststreampublisheritems".into(),
            getaddressbalances: "getaddressbalances".into(),
            listaddresstransactions: "listaddresstransactions".into(),
            listaddresses: "listaddresses".into(),
            listpermissions: "listpermissions".into(),
            // -5 invalid address or key, -8 invalid parameter (block height
            // out of range), -708 entity not found.
            not_found_codes: vec![-5, -8, -708],
        }
    }
}

impl MethodTable {
    pub fn method(&self, op: Operation) -> &str {
        match op {
            Operation::GetInfo => &self.getinfo,
            Operation::GetBlockHash => &self.getblockhash,
            Operation::GetBlock => &self.getblock,
            Operation::GetRawTransaction => &self.getrawtransaction,
            Operation::ListBlocks => &self.listblocks,
            Operation::ListAssets => &self.listassets,
            Operation::ListAssetTransactions => &self.listassettransactions,
            Operation::ListStreams => &self.liststreams,
            Operation::ListStreamItems => &self.liststreamitems,
            Operation::ListStreamKeys => &self.liststreamkeys,
            Operation::ListStreamPublishers => &self.liststreampublishers,
            Operation::ListStreamKeyItems => &self.liststreamkeyitems,
            Operation::ListStreamPublisherItems => &self.liststreampublisheritems,
            Operation::GetAddressBalances => &self.getaddressbalances,
            Operation::ListAddressTransactions => &self.listaddresstransactions,
            Operation::ListAddresses => &self.listaddresses,
            Operation::ListPermissions => &self.listpermissions,
        }
    }

    pub fn is_not_found(&self, code: i64) -> bool {
        self.not_found_codes.contains(&code)
    }

    /// Every method name must be non-empty.
    pub fn validate(&self) -> Result<(), String> {
        match Operation::ALL.iter().find(|op| self.method(**op).trim().is_empty()) {
            Some(op) => Err(format!("empty RPC method name for {op:?}")),
            None => Ok(()),
        }
    }
}

/// Cache lifetimes per [`TtlClass`], in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub head_ms: u64,
    pub immutable_ms: u64,
    pub listing_ms: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            head_ms: 30_000,
            immutable_ms: 3_600_000,
            listing_ms: 10_000,
        }
    }
}

impl TtlPolicy {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        let ms = match class {
            TtlClass::Head => self.head_ms,
            TtlClass::Immutable => self.immutable_ms,
            TtlClass::Listing => self.listing_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn for_op(&self, op: Operation) -> Duration {
        self.ttl(op.ttl_class())
    }
}
