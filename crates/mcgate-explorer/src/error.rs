//! Explorer-level errors and their HTTP-like status classes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mcgate_core::cache::LoadAborted;
use mcgate_core::error::TransportError;

/// Kind of entity an explorer lookup is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Chain,
    Block,
    Transaction,
    Asset,
    Stream,
    StreamItem,
    Address,
    Permission,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Chain => "chain",
            Self::Block => "block",
            Self::Transaction => "transaction",
            Self::Asset => "asset",
            Self::Stream => "stream",
            Self::StreamItem => "stream item",
            Self::Address => "address",
            Self::Permission => "permission",
        };
        f.write_str(s)
    }
}

/// Coarse outcome class, mirroring the HTTP status a front-end would use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusClass {
    BadRequest,
    NotFound,
    Internal,
    BadGateway,
    Unavailable,
}

impl StatusClass {
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Internal => 500,
            Self::BadGateway => 502,
            Self::Unavailable => 503,
        }
    }
}

/// Errors surfaced by the explorer gateway and registry.
#[derive(Debug, Clone, Error)]
pub enum ExplorerError {
    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("{method} failed with RPC error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("circuit breaker open for {endpoint} (retry in {}ms)", .retry_after.as_millis())]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    #[error("invalid {name} {value:?}: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("unknown chain: {0}")]
    ChainNotFound(String),

    #[error("chain {0} is shut down")]
    ChainClosed(String),

    #[error("could not decode {method} response: {reason}")]
    Decode { method: String, reason: String },

    #[error("load of {key} aborted")]
    LoadAborted { key: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Daemon codes meaning "your parameters are wrong".
const BAD_PARAMS_CODES: [i64; 2] = [-32602, -8];

impl ExplorerError {
    pub fn invalid(name: &str, value: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Lift a transport failure of `method` into the explorer taxonomy.
    pub fn from_transport(method: &str, err: TransportError) -> Self {
        match err {
            TransportError::Rpc(e) => Self::Rpc {
                method: method.to_string(),
                code: e.code,
                message: e.message,
            },
            TransportError::CircuitOpen {
                endpoint,
                retry_after,
            } => Self::CircuitOpen {
                endpoint,
                retry_after,
            },
            TransportError::Deserialization(reason) => Self::Decode {
                method: method.to_string(),
                reason,
            },
            other => Self::Transport(other),
        }
    }

    pub fn status(&self) -> StatusClass {
        match self {
            Self::NotFound { .. } | Self::ChainNotFound(_) => StatusClass::NotFound,
            Self::InvalidParameter { .. } => StatusClass::BadRequest,
            Self::Rpc { code, .. } if BAD_PARAMS_CODES.contains(code) => StatusClass::BadRequest,
            Self::Rpc { .. } => StatusClass::BadGateway,
            Self::Transport(_)
            | Self::CircuitOpen { .. }
            | Self::ChainClosed(_)
            | Self::LoadAborted { .. } => StatusClass::Unavailable,
            Self::Decode { .. } | Self::Config(_) => StatusClass::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Suggested wait before retrying, when the failure carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Emit a log event at the level matching this error's class.
    pub fn log(&self, chain: &str, operation: &str) {
        match self.status() {
            StatusClass::Unavailable | StatusClass::BadGateway => {
                tracing::warn!(chain, operation, error = %self, "explorer operation failed")
            }
            StatusClass::NotFound => {
                tracing::debug!(chain, operation, error = %self, "entity not found")
            }
            StatusClass::BadRequest => {
                tracing::info!(chain, operation, error = %self, "rejected request")
            }
            StatusClass::Internal => {
                tracing::error!(chain, operation, error = %self, "internal explorer error")
            }
        }
    }
}

impl From<LoadAborted> for ExplorerError {
    fn from(e: LoadAborted) -> Self {
        Self::LoadAborted { key: e.key }
    }
}

impl From<serde_yaml::Error> for ExplorerError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Config(e.to_string())
    }
}
