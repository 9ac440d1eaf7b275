//! mcgate-http: pooled HTTP JSON-RPC transport for MultiChain daemons.
//!
//! [`HttpTransport`] implements [`mcgate_core::RpcTransport`] over a bounded
//! [`mcgate_core::ConnectionPool`] of `reqwest` clients, one persistent
//! connection each.

pub mod client;

pub use client::{HttpTransport, HttpTransportConfig};
