//! Explorer configuration, loaded from YAML.
//!
//! Every section has defaults, so a minimal file only lists its chains:
//!
//! ```yaml
//! chains:
//!   - name: chain1
//!     endpoints:
//!       - { port: 8570, user: multichainrpc, password: secret }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mcgate_core::cache::CacheConfig;
use mcgate_core::endpoint::{ChainEndpoint, Credentials, Scheme};
use mcgate_core::policy::{CircuitBreakerConfig, RetryConfig};
use mcgate_core::request::RpcVersion;
use mcgate_http::HttpTransportConfig;

use crate::datadir;
use crate::error::ExplorerError;
use crate::methods::{MethodTable, TtlPolicy};
use crate::telemetry::{LogConfig, LOG_ENV};

/// When chains open their first connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// On first use of a chain's gateway.
    #[default]
    Lazy,
    /// During `ChainRegistry::start`.
    Eager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
    pub sweep_interval_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_entries,
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub open_duration_ms: u64,
    pub half_open_trials: u32,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            open_duration_ms: 30_000,
            half_open_trials: 1,
        }
    }
}

impl BreakerSection {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_millis(self.failure_window_ms),
            open_duration: Duration::from_millis(self.open_duration_ms),
            half_open_trials: self.half_open_trials,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            jitter_fraction: self.jitter_fraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub max_connections: usize,
    pub checkout_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections: 8,
            checkout_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl PoolSection {
    pub fn to_transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            max_connections: self.max_connections,
            checkout_timeout: Duration::from_millis(self.checkout_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// One daemon endpoint as written in the config file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default)]
    pub jsonrpc: RpcVersion,
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("scheme", &self.scheme)
            .field("jsonrpc", &self.jsonrpc)
            .finish()
    }
}

impl EndpointConfig {
    pub fn to_endpoint(&self) -> ChainEndpoint {
        let credentials = match (&self.user, &self.password) {
            (None, None) => None,
            (user, password) => Some(Credentials::new(
                user.as_deref().unwrap_or("multichainrpc"),
                password.as_deref().unwrap_or_default(),
            )),
        };
        ChainEndpoint::new(self.scheme, self.host.as_str(), self.port, credentials)
            .with_version(self.jsonrpc)
    }
}

/// One chain: its names and where its daemons are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// URL-safe identifier; defaults to the percent-encoded name.
    #[serde(default)]
    pub path_name: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    /// Data directory holding `multichain.conf` (and `params.dat`).
    #[serde(default)]
    pub datadir: Option<PathBuf>,
}

impl ChainConfig {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn path_name(&self) -> String {
        self.path_name
            .clone()
            .unwrap_or_else(|| percent_encode(&self.name))
    }

    /// Configured endpoints followed by the one derived from `datadir`.
    pub fn resolve_endpoints(&self) -> Result<Vec<ChainEndpoint>, ExplorerError> {
        let mut endpoints: Vec<ChainEndpoint> =
            self.endpoints.iter().map(EndpointConfig::to_endpoint).collect();
        if let Some(dir) = &self.datadir {
            endpoints.push(datadir::endpoint_from_datadir(dir)?);
        }
        if endpoints.is_empty() {
            return Err(ExplorerError::Config(format!(
                "chain {} has neither endpoints nor datadir",
                self.name
            )));
        }
        Ok(endpoints)
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Top-level explorer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub connect: ConnectMode,
    /// Chain-tip polling period; 0 disables the head watcher.
    pub head_poll_interval_ms: u64,
    pub log: LogConfig,
    pub cache: CacheSection,
    pub ttl: TtlPolicy,
    pub breaker: BreakerSection,
    pub retry: RetrySection,
    pub pool: PoolSection,
    pub methods: MethodTable,
    pub chains: Vec<ChainConfig>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            connect: ConnectMode::default(),
            head_poll_interval_ms: 5_000,
            log: LogConfig::default(),
            cache: CacheSection::default(),
            ttl: TtlPolicy::default(),
            breaker: BreakerSection::default(),
            retry: RetrySection::default(),
            pool: PoolSection::default(),
            methods: MethodTable::default(),
            chains: Vec::new(),
        }
    }
}

impl ExplorerConfig {
    /// Parse and validate a YAML document. Environment overrides are not applied.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ExplorerError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, apply environment overrides, and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ExplorerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ExplorerError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Self = serde_yaml::from_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup (`MCGATE_LOG`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(LOG_ENV).filter(|l| !l.trim().is_empty()) {
            self.log.level = level;
        }
    }

    pub fn head_poll_interval(&self) -> Duration {
        Duration::from_millis(self.head_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ExplorerError> {
        let fail = |msg: String| Err(ExplorerError::Config(msg));

        if self.chains.is_empty() {
            return fail("at least one chain must be configured".into());
        }
        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for chain in &self.chains {
            if chain.name.trim().is_empty() {
                return fail("chain name must not be empty".into());
            }
            if !names.insert(chain.name.as_str()) {
                return fail(format!("duplicate chain name {}", chain.name));
            }
            if !paths.insert(chain.path_name()) {
                return fail(format!("duplicate chain path name {}", chain.path_name()));
            }
            if chain.endpoints.is_empty() && chain.datadir.is_none() {
                return fail(format!("chain {} has neither endpoints nor datadir", chain.name));
            }
            if let Some(ep) = chain.endpoints.iter().find(|ep| ep.port == 0) {
                return fail(format!("chain {}: endpoint {} has port 0", chain.name, ep.host));
            }
        }
        // Names and path names share one lookup namespace.
        if let Some(clash) = self
            .chains
            .iter()
            .find(|c| c.path_name() != c.name && names.contains(c.path_name().as_str()))
        {
            return fail(format!(
                "path name {} of chain {} collides with another chain's name",
                clash.path_name(),
                clash.name
            ));
        }

        if self.cache.max_entries == 0 {
            return fail("cache.max_entries must be non-zero".into());
        }
        if self.breaker.failure_threshold == 0 || self.breaker.half_open_trials == 0 {
            return fail("breaker.failure_threshold and breaker.half_open_trials must be non-zero".into());
        }
        if self.breaker.open_duration_ms == 0 || self.breaker.failure_window_ms == 0 {
            return fail("breaker durations must be non-zero".into());
        }
        if self.pool.max_connections == 0
            || self.pool.checkout_timeout_ms == 0
            || self.pool.request_timeout_ms == 0
        {
            return fail("pool sizes and timeouts must be non-zero".into());
        }
        if self.retry.multiplier < 1.0 || !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            return fail("retry.multiplier must be >= 1 and retry.jitter_fraction within 0..=1".into());
        }
        self.methods.validate().map_err(ExplorerError::Config)
    }
}
