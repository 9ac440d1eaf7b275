//! Transport-level error types.

use std::time::Duration;

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
///
/// The type is `Clone` so a single failure can be handed to every caller
/// waiting on the same cached load.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// HTTP exchange failed (bad status, TLS failure, unreadable body, ...).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The daemon could not be reached at all.
    #[error("connection to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// JSON-RPC protocol-level error returned by the daemon.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Circuit breaker is open: the endpoint is failing fast.
    #[error("circuit breaker open for {endpoint} (retry in {}ms)", .retry_after.as_millis())]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    /// Every endpoint of a failover set is unavailable.
    #[error("all endpoints unavailable")]
    AllEndpointsDown,

    /// Request timed out after the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// No pooled connection became free within the checkout timeout.
    #[error("connection pool for {endpoint} exhausted after {ms}ms")]
    PoolTimeout { endpoint: String, ms: u64 },

    /// Response could not be deserialized.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The transport (or its pool) has been shut down.
    #[error("transport closed")]
    Closed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Connect { .. } | Self::Timeout { .. } | Self::PoolTimeout { .. }
        )
    }

    /// Returns `true` if this is a daemon-side error (the daemon answered).
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if this failure says something about endpoint health
    /// and should count against its circuit breaker.
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Connect { .. } | Self::Timeout { .. } | Self::Deserialization(_)
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Deserialization(e.to_string())
    }
}
