//! mcgate-core: foundation traits and types for mcgate.
//!
//! # Overview
//!
//! mcgate fronts one or more MultiChain daemons with a resilient, cached
//! JSON-RPC layer. The core crate defines:
//!
//! - [`RpcTransport`]: the central async trait every transport implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types (JSON-RPC 1.0 and 2.0)
//! - [`TransportError`]: structured, cloneable error type
//! - [`ChainEndpoint`]: immutable daemon address + credentials
//! - [`policy`] module: circuit breaker, retry, and their transport decorators
//! - [`pool`] module: bounded connection pool with scoped checkout
//! - [`failover`] module: round-robin over several endpoints of one chain
//! - [`cache`] module: single-flight TTL/LRU response cache

pub mod cache;
pub mod endpoint;
pub mod error;
pub mod failover;
pub mod policy;
pub mod pool;
pub mod request;
pub mod transport;

pub use cache::{CacheConfig, CacheKey, CacheStats, LoadAborted, ResponseCache};
pub use endpoint::{ChainEndpoint, Credentials, Scheme};
pub use error::TransportError;
pub use failover::FailoverTransport;
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam, RpcVersion};
pub use transport::{HealthStatus, RpcTransport};
