//! mcgate-explorer: MultiChain explorer operations over the mcgate
//! transport stack.
//!
//! A [`ChainRegistry`] is built from an [`ExplorerConfig`] and hands out a
//! [`Gateway`] per chain. Gateways validate inputs, go through a
//! single-flight response cache and decode daemon results into the types
//! in [`types`].
//!
//! ```no_run
//! # async fn run() -> Result<(), mcgate_explorer::ExplorerError> {
//! use mcgate_explorer::{ChainRegistry, ExplorerConfig, PageRequest};
//!
//! let config = ExplorerConfig::from_file("explorer.yaml")?;
//! mcgate_explorer::telemetry::init_tracing(&config.log)?;
//! let registry = ChainRegistry::from_config(&config)?;
//! registry.start().await;
//!
//! let gateway = registry.resolve("chain1")?.gateway().await?;
//! let latest = gateway.list_blocks(&PageRequest::latest(10)).await?;
//! println!("{} blocks, more: {}", latest.items.len(), latest.has_more);
//!
//! registry.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod datadir;
pub mod error;
pub mod gateway;
pub mod methods;
pub mod query;
pub mod registry;
pub mod telemetry;
pub mod types;
pub mod validation;

pub use config::{ChainConfig, ConnectMode, EndpointConfig, ExplorerConfig};
pub use error::{EntityKind, ExplorerError, StatusClass};
pub use gateway::{Gateway, GatewayCache, HealthReport};
pub use methods::{MethodTable, Operation, TtlClass, TtlPolicy};
pub use query::{Query, QueryResponse};
pub use registry::{ChainHandle, ChainRegistry, ChainState, ChainStatus, EndpointStatus};
pub use types::{Order, Page, PageRequest, SearchHit};
