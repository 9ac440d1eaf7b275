//! Closed set of explorer requests, dispatched by [`Gateway::execute`].
//!
//! A front-end (HTTP handler, CLI, test script) builds a [`Query`] from
//! whatever it parses and gets back a serialisable [`QueryResponse`].

use serde::{Deserialize, Serialize};

use crate::error::ExplorerError;
use crate::gateway::{Gateway, HealthReport};
use crate::types::{
    AddressInfo, Asset, AssetBalance, Block, BlockSummary, ChainInfo, LedgerEntry, Page,
    PageRequest, Permission, SearchHit, Stream, StreamItem, StreamKeySummary,
    StreamPublisherSummary, Transaction,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Query {
    ChainInfo,
    GetBlockHash {
        height: u64,
    },
    GetBlockByHeight {
        height: u64,
    },
    GetBlockByHash {
        hash: String,
    },
    GetTransaction {
        txid: String,
    },
    ListBlocks {
        #[serde(default)]
        page: PageRequest,
    },
    ListAssets {
        #[serde(default)]
        page: PageRequest,
    },
    GetAsset {
        name: String,
    },
    ListAssetTransactions {
        name: String,
        #[serde(default)]
        page: PageRequest,
    },
    ListStreams {
        #[serde(default)]
        page: PageRequest,
    },
    GetStream {
        name: String,
    },
    ListStreamItems {
        stream: String,
        #[serde(default)]
        page: PageRequest,
    },
    ListStreamKeys {
        stream: String,
        #[serde(default)]
        page: PageRequest,
    },
    ListStreamPublishers {
        stream: String,
        #[serde(default)]
        page: PageRequest,
    },
    ListStreamKeyItems {
        stream: String,
        key: String,
        #[serde(default)]
        page: PageRequest,
    },
    ListStreamPublisherItems {
        stream: String,
        publisher: String,
        #[serde(default)]
        page: PageRequest,
    },
    GetAddressBalances {
        address: String,
    },
    ListAddressTransactions {
        address: String,
        #[serde(default)]
        page: PageRequest,
    },
    ListAddresses,
    ListPermissions {
        #[serde(default = "all_permissions")]
        kind: String,
        #[serde(default)]
        page: PageRequest,
    },
    ListAddressPermissions {
        address: String,
    },
    Search {
        query: String,
    },
    Health,
}

fn all_permissions() -> String {
    "*".to_string()
}

impl Query {
    /// Operation name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChainInfo => "chain_info",
            Self::GetBlockHash { .. } => "get_block_hash",
            Self::GetBlockByHeight { .. } => "get_block_by_height",
            Self::GetBlockByHash { .. } => "get_block_by_hash",
            Self::GetTransaction { .. } => "get_transaction",
            Self::ListBlocks { .. } => "list_blocks",
            Self::ListAssets { .. } => "list_assets",
            Self::GetAsset { .. } => "get_asset",
            Self::ListAssetTransactions { .. } => "list_asset_transactions",
            Self::ListStreams { .. } => "list_streams",
            Self::GetStream { .. } => "get_stream",
            Self::ListStreamItems { .. } => "list_stream_items",
            Self::ListStreamKeys { .. } => "list_stream_keys",
            Self::ListStreamPublishers { .. } => "list_stream_publishers",
            Self::ListStreamKeyItems { .. } => "list_stream_key_items",
            Self::ListStreamPublisherItems { .. } => "list_stream_publisher_items",
            Self::GetAddressBalances { .. } => "get_address_balances",
            Self::ListAddressTransactions { .. } => "list_address_transactions",
            Self::ListAddresses => "list_addresses",
            Self::ListPermissions { .. } => "list_permissions",
            Self::ListAddressPermissions { .. } => "list_address_permissions",
            Self::Search { .. } => "search",
            Self::Health => "health",
        }
    }
}

/// Result of a [`Query`], tagged by payload kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueryResponse {
    ChainInfo(ChainInfo),
    BlockHash(String),
    Block(Block),
    Transaction(Transaction),
    Blocks(Page<BlockSummary>),
    Assets(Page<Asset>),
    Asset(Asset),
    LedgerEntries(Page<LedgerEntry>),
    Streams(Page<Stream>),
    Stream(Stream),
    StreamItems(Page<StreamItem>),
    StreamKeys(Page<StreamKeySummary>),
    StreamPublishers(Page<StreamPublisherSummary>),
    Balances(Vec<AssetBalance>),
    Addresses(Vec<AddressInfo>),
    Permissions(Page<Permission>),
    AddressPermissions(Vec<Permission>),
    SearchHits(Vec<SearchHit>),
    Health(HealthReport),
}

impl Gateway {
    /// Run one query. Failures are logged at the level of their class
    /// before being returned.
    pub async fn execute(&self, query: Query) -> Result<QueryResponse, ExplorerError> {
        let name = query.name();
        let result = self.dispatch(query).await;
        if let Err(e) = &result {
            e.log(self.chain(), name);
        }
        result
    }

    async fn dispatch(&self, query: Query) -> Result<QueryResponse, ExplorerError> {
        use QueryResponse as R;
        Ok(match query {
            Query::ChainInfo => R::ChainInfo(self.chain_info().await?),
            Query::GetBlockHash { height } => R::BlockHash(self.get_block_hash(height).await?),
            Query::GetBlockByHeight { height } => R::Block(self.get_block_by_height(height).await?),
            Query::GetBlockByHash { hash } => R::Block(self.get_block_by_hash(&hash).await?),
            Query::GetTransaction { txid } => R::Transaction(self.get_transaction(&txid).await?),
            Query::ListBlocks { page } => R::Blocks(self.list_blocks(&page).await?),
            Query::ListAssets { page } => R::Assets(self.list_assets(&page).await?),
            Query::GetAsset { name } => R::Asset(self.get_asset(&name).await?),
            Query::ListAssetTransactions { name, page } => {
                R::LedgerEntries(self.list_asset_transactions(&name, &page).await?)
            }
            Query::ListStreams { page } => R::Streams(self.list_streams(&page).await?),
            Query::GetStream { name } => R::Stream(self.get_stream(&name).await?),
            Query::ListStreamItems { stream, page } => {
                R::StreamItems(self.list_stream_items(&stream, &page).await?)
            }
            Query::ListStreamKeys { stream, page } => {
                R::StreamKeys(self.list_stream_keys(&stream, &page).await?)
            }
            Query::ListStreamPublishers { stream, page } => {
                R::StreamPublishers(self.list_stream_publishers(&stream, &page).await?)
            }
            Query::ListStreamKeyItems { stream, key, page } => {
                R::StreamItems(self.list_stream_key_items(&stream, &key, &page).await?)
            }
            Query::ListStreamPublisherItems {
                stream,
                publisher,
                page,
            } => R::StreamItems(
                self.list_stream_publisher_items(&stream, &publisher, &page)
                    .await?,
            ),
            Query::GetAddressBalances { address } => {
                R::Balances(self.get_address_balances(&address).await?)
            }
            Query::ListAddressTransactions { address, page } => {
                R::LedgerEntries(self.list_address_transactions(&address, &page).await?)
            }
            Query::ListAddresses => R::Addresses(self.list_addresses().await?),
            Query::ListPermissions { kind, page } => {
                R::Permissions(self.list_permissions(&kind, &page).await?)
            }
            Query::ListAddressPermissions { address } => {
                R::AddressPermissions(self.list_address_permissions(&address).await?)
            }
            Query::Search { query } => R::SearchHits(self.search(&query).await?),
            Query::Health => R::Health(self.health_check().await),
        })
    }
}
