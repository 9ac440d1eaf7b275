//! The `RpcTransport` trait: the core abstraction every layer builds on.
//!
//! Transports compose: the HTTP transport talks to a daemon, and the
//! policy decorators ([`crate::policy`]) and [`crate::failover`] wrap any
//! other transport while implementing the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Endpoint health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Endpoint is responding normally.
    Healthy,
    /// Endpoint is being probed or only partially available.
    Degraded,
    /// Endpoint is failing fast (circuit open).
    Unhealthy,
    /// Health status is unknown (not yet checked).
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// The central async trait every RPC transport must implement.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Cancellation
/// Dropping the future returned by [`send`](RpcTransport::send) must
/// release every resource the call holds (pooled connections, breaker
/// trial permits).
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the response envelope.
    ///
    /// A daemon-reported error comes back as `Ok` with `error` set;
    /// only failures to obtain an envelope are `Err`.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Return the current health status of this transport.
    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Return the transport's identifier (URL or name, never credentials).
    fn url(&self) -> &str;

    /// Send a request and unwrap the envelope into its result value.
    ///
    /// Daemon errors become [`TransportError::Rpc`].
    async fn call_value(
        &self,
        id: u64,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, TransportError> {
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self.send(req).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    /// Convenience: call a method and deserialize the result.
    async fn call<T: DeserializeOwned>(
        &self,
        id: u64,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError>
    where
        Self: Sized,
    {
        let result = self.call_value(id, method, params).await?;
        serde_json::from_value(result).map_err(TransportError::from)
    }
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for Arc<T> {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        (**self).send(req).await
    }

    fn health(&self) -> HealthStatus {
        (**self).health()
    }

    fn url(&self) -> &str {
        (**self).url()
    }
}
