//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! Each pooled handle is a `reqwest::Client` that keeps at most one idle
//! connection to the daemon, so the pool size bounds the number of
//! concurrent connections per endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mcgate_core::endpoint::ChainEndpoint;
use mcgate_core::error::TransportError;
use mcgate_core::pool::{ConnectionPool, PoolConfig, PoolStats};
use mcgate_core::request::{JsonRpcRequest, JsonRpcResponse};
use mcgate_core::transport::{HealthStatus, RpcTransport};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Maximum concurrent connections to the endpoint.
    pub max_connections: usize,
    /// How long a call waits for a free connection.
    pub checkout_timeout: Duration,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            checkout_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC over HTTP(S) to one daemon endpoint.
pub struct HttpTransport {
    endpoint: Arc<ChainEndpoint>,
    pool: Arc<ConnectionPool<reqwest::Client>>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: Arc<ChainEndpoint>, config: HttpTransportConfig) -> Self {
        let request_timeout = config.request_timeout;
        let pool = ConnectionPool::new(
            endpoint.url().to_string(),
            PoolConfig {
                max_connections: config.max_connections,
                checkout_timeout: config.checkout_timeout,
            },
            move || {
                reqwest::Client::builder()
                    .timeout(request_timeout)
                    .pool_max_idle_per_host(1)
                    .build()
                    .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))
            },
        );
        Self {
            endpoint,
            pool,
            request_timeout,
        }
    }

    pub fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the connection pool; later calls fail with `Closed`.
    pub fn close(&self) {
        self.pool.close();
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else if e.is_connect() {
            TransportError::Connect {
                endpoint: self.endpoint.url().to_string(),
                reason: e.to_string(),
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut conn = self.pool.checkout().await?;
        let req = req.with_version(self.endpoint.version());

        let mut request = conn.post(self.endpoint.url()).json(&req);
        if let Some(creds) = self.endpoint.credentials() {
            request = request.basic_auth(creds.user(), Some(creds.password()));
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                conn.discard();
                let err = self.classify(e);
                tracing::debug!(url = %self.endpoint, method = %req.method, error = %err, "request failed");
                return Err(err);
            }
        };

        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                conn.discard();
                return Err(self.classify(e));
            }
        };
        drop(conn);

        // MultiChain reports RPC faults with HTTP 500 and a regular envelope.
        match serde_json::from_slice::<JsonRpcResponse>(&body) {
            Ok(envelope) if status.is_success() || envelope.error.is_some() => Ok(envelope),
            Err(e) if status.is_success() => Err(TransportError::Deserialization(e.to_string())),
            _ if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN =>
            {
                tracing::warn!(url = %self.endpoint, status = status.as_u16(), "daemon rejected credentials");
                Err(TransportError::Http(format!(
                    "HTTP {}: check rpcuser / rpcpassword",
                    status.as_u16()
                )))
            }
            _ => {
                let text = String::from_utf8_lossy(&body);
                Err(TransportError::Http(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    text.trim()
                )))
            }
        }
    }

    fn health(&self) -> HealthStatus {
        if self.pool.is_closed() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Unknown
        }
    }

    fn url(&self) -> &str {
        self.endpoint.url()
    }
}
