//! Multi-chain registry: one gateway, cache, breaker set and pool set per
//! configured chain.
//!
//! Each chain's transport stack is assembled as
//! `Retry → Failover → [CircuitBreaker → HTTP]*`, with one breaker and one
//! connection pool per endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use mcgate_core::cache::{CacheStats, ResponseCache};
use mcgate_core::endpoint::ChainEndpoint;
use mcgate_core::failover::FailoverTransport;
use mcgate_core::policy::{CircuitBreaker, CircuitBreakerTransport, CircuitState, RetryTransport};
use mcgate_core::pool::PoolStats;
use mcgate_core::transport::RpcTransport;
use mcgate_http::HttpTransport;

use crate::config::{ChainConfig, ConnectMode, ExplorerConfig};
use crate::error::ExplorerError;
use crate::gateway::Gateway;

/// Lifecycle of a chain.
///
/// `Degraded` is never stored: it is `Ready` while at least one endpoint
/// breaker is not closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Unconnected,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

struct EndpointSlot {
    endpoint: Arc<ChainEndpoint>,
    breaker: CircuitBreaker,
    /// Present for HTTP endpoints; injected transports have no pool.
    http: Option<Arc<HttpTransport>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub breaker: CircuitState,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainStatus {
    pub name: String,
    pub display_name: String,
    pub path_name: String,
    pub state: ChainState,
    pub height: Option<u64>,
    pub endpoints: Vec<EndpointStatus>,
    pub cache: CacheStats,
}

/// Everything the registry owns for one chain.
pub struct ChainHandle {
    name: String,
    display_name: String,
    path_name: String,
    endpoints: Vec<EndpointSlot>,
    gateway: Gateway,
    connected: OnceCell<()>,
    state: Mutex<ChainState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandle")
            .field("name", &self.name)
            .field("path_name", &self.path_name)
            .field("state", &self.state())
            .finish()
    }
}

impl ChainHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock() == ChainState::Closed
    }

    pub fn state(&self) -> ChainState {
        let state = *self.state.lock();
        if state == ChainState::Ready
            && self
                .endpoints
                .iter()
                .any(|slot| slot.breaker.state() != CircuitState::Closed)
        {
            return ChainState::Degraded;
        }
        state
    }

    /// The chain's gateway, connecting on first use.
    ///
    /// Concurrent first callers share one connection attempt. A failed
    /// attempt leaves the chain unconnected and is retried by the next call.
    pub async fn gateway(&self) -> Result<Gateway, ExplorerError> {
        if self.is_closed() {
            return Err(ExplorerError::ChainClosed(self.name.clone()));
        }
        self.connected.get_or_try_init(|| self.connect()).await?;
        if self.is_closed() {
            return Err(ExplorerError::ChainClosed(self.name.clone()));
        }
        Ok(self.gateway.clone())
    }

    fn set_state(&self, next: ChainState) {
        let mut state = self.state.lock();
        if *state != ChainState::Closed {
            *state = next;
        }
    }

    async fn connect(&self) -> Result<(), ExplorerError> {
        self.set_state(ChainState::Connecting);
        tracing::debug!(chain = %self.name, "connecting");
        match self.gateway.refresh_head().await {
            Ok(info) => {
                self.set_state(ChainState::Ready);
                tracing::info!(chain = %self.name, height = info.blocks, "chain connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(ChainState::Unconnected);
                tracing::warn!(chain = %self.name, error = %e, "chain connect failed");
                Err(e)
            }
        }
    }

    /// Poll the chain tip so new blocks invalidate listings promptly.
    /// Chains that have not connected yet are skipped.
    fn spawn_head_watcher(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(handle) = weak.upgrade() else { break };
                if handle.is_closed() {
                    break;
                }
                if !handle.connected.initialized() {
                    continue;
                }
                if let Err(e) = handle.gateway.refresh_head().await {
                    tracing::debug!(chain = %handle.name, error = %e, "head poll failed");
                }
            }
        })
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            path_name: self.path_name.clone(),
            state: self.state(),
            height: self.gateway.last_height(),
            endpoints: self
                .endpoints
                .iter()
                .map(|slot| {
                    let snap = slot.breaker.snapshot();
                    EndpointStatus {
                        url: slot.endpoint.url().to_string(),
                        breaker: snap.state,
                        failure_count: snap.failure_count,
                        retry_after_ms: snap.retry_after.map(|d| d.as_millis() as u64),
                        pool: slot.http.as_ref().map(|h| h.pool_stats()),
                    }
                })
                .collect(),
            cache: self.gateway.cache().stats(),
        }
    }

    /// Close the chain: background tasks stop, in-flight loads are aborted
    /// and pools are closed. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ChainState::Closed {
                return;
            }
            *state = ChainState::Closed;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.gateway.cache().close();
        for slot in &self.endpoints {
            if let Some(http) = &slot.http {
                http.close();
            }
        }
        tracing::info!(chain = %self.name, "chain closed");
    }
}

/// All configured chains, resolvable by name or path name.
pub struct ChainRegistry {
    chains: Vec<Arc<ChainHandle>>,
    by_id: HashMap<String, usize>,
    connect: ConnectMode,
    head_poll_interval: Duration,
    started: AtomicBool,
}

impl std::fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.chains.iter()).finish()
    }
}

impl ChainRegistry {
    /// Build HTTP transport stacks for every configured chain. Nothing is
    /// contacted until [`start`](Self::start) or first use.
    pub fn from_config(config: &ExplorerConfig) -> Result<Self, ExplorerError> {
        let pool = config.pool.to_transport_config();
        Self::build(config, |_, endpoint| {
            let http = Arc::new(HttpTransport::new(Arc::clone(endpoint), pool.clone()));
            (Arc::clone(&http) as Arc<dyn RpcTransport>, Some(http))
        })
    }

    /// Like [`from_config`](Self::from_config), with the per-endpoint
    /// transport supplied by `factory` (mock daemons, custom transports).
    /// Breakers, failover and retries are still applied on top.
    pub fn from_config_with_transports<F>(config: &ExplorerConfig, mut factory: F) -> Result<Self, ExplorerError>
    where
        F: FnMut(&ChainConfig, &ChainEndpoint) -> Arc<dyn RpcTransport>,
    {
        Self::build(config, |chain, endpoint| (factory(chain, &**endpoint), None))
    }

    fn build<F>(config: &ExplorerConfig, mut make: F) -> Result<Self, ExplorerError>
    where
        F: FnMut(&ChainConfig, &Arc<ChainEndpoint>) -> (Arc<dyn RpcTransport>, Option<Arc<HttpTransport>>),
    {
        config.validate()?;
        let breaker_config = config.breaker.to_breaker_config();
        let retry_config = config.retry.to_retry_config();

        let mut chains = Vec::with_capacity(config.chains.len());
        let mut by_id = HashMap::new();
        for chain in &config.chains {
            let mut slots = Vec::new();
            let mut members: Vec<Arc<dyn RpcTransport>> = Vec::new();
            for endpoint in chain.resolve_endpoints()? {
                let endpoint = Arc::new(endpoint);
                let (transport, http) = make(chain, &endpoint);
                let breaker = CircuitBreaker::named(endpoint.url(), breaker_config.clone());
                members.push(Arc::new(CircuitBreakerTransport::with_breaker(
                    transport,
                    breaker.clone(),
                )));
                slots.push(EndpointSlot {
                    endpoint,
                    breaker,
                    http,
                });
            }
            let stack = RetryTransport::new(FailoverTransport::new(members), retry_config.clone());
            let cache = ResponseCache::new(chain.name.clone(), config.cache.to_cache_config());
            let gateway = Gateway::new(
                chain.name.clone(),
                Arc::new(stack),
                cache,
                config.methods.clone(),
                config.ttl,
            );

            let index = chains.len();
            by_id.insert(chain.name.clone(), index);
            by_id.insert(chain.path_name(), index);
            tracing::info!(
                chain = %chain.name,
                path = %chain.path_name(),
                endpoints = slots.len(),
                "chain registered"
            );
            chains.push(Arc::new(ChainHandle {
                name: chain.name.clone(),
                display_name: chain.display_name().to_string(),
                path_name: chain.path_name(),
                endpoints: slots,
                gateway,
                connected: OnceCell::new(),
                state: Mutex::new(ChainState::Unconnected),
                tasks: Mutex::new(Vec::new()),
            }));
        }

        Ok(Self {
            chains,
            by_id,
            connect: config.connect,
            head_poll_interval: config.head_poll_interval(),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn background tasks and, in eager mode, connect every chain.
    /// A chain that fails to connect stays unconnected and is retried on
    /// first use. Only the first call has any effect.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("registry already started");
            return;
        }
        for handle in &self.chains {
            if handle.is_closed() {
                continue;
            }
            let mut tasks = Vec::new();
            if let Some(sweeper) = handle.gateway.cache().spawn_sweeper() {
                tasks.push(sweeper);
            }
            if !self.head_poll_interval.is_zero() {
                tasks.push(handle.spawn_head_watcher(self.head_poll_interval));
            }
            handle.tasks.lock().extend(tasks);
        }

        if self.connect == ConnectMode::Eager {
            let results =
                futures::future::join_all(self.chains.iter().map(|h| h.gateway())).await;
            let failed = results.iter().filter(|r| r.is_err()).count();
            tracing::info!(
                chains = self.chains.len(),
                failed,
                "eager connect finished"
            );
        }
    }

    /// Look a chain up by name or path name.
    pub fn resolve(&self, id: &str) -> Result<Arc<ChainHandle>, ExplorerError> {
        self.by_id
            .get(id)
            .map(|&i| Arc::clone(&self.chains[i]))
            .ok_or_else(|| ExplorerError::ChainNotFound(id.to_string()))
    }

    /// Chains in configuration order.
    pub fn chains(&self) -> &[Arc<ChainHandle>] {
        &self.chains
    }

    pub fn status(&self) -> Vec<ChainStatus> {
        self.chains.iter().map(|h| h.status()).collect()
    }

    pub fn shutdown(&self) {
        for handle in &self.chains {
            handle.close();
        }
        tracing::info!(chains = self.chains.len(), "registry shut down");
    }
}
