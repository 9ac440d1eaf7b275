//! Single-flight TTL + LRU response cache.
//!
//! [`ResponseCache::get_or_load`] memoizes the result of an async loader
//! under a [`CacheKey`]. Concurrent callers for the same key share one load:
//! the loader runs on its own task, and every caller awaits a shared handle
//! to it. Dropping a waiting caller never cancels the load for the others.
//!
//! Loader errors reach every waiter of that load and are never stored.
//! Entries expire after their TTL, the entry count is bounded by LRU
//! eviction, and invalidation detaches in-flight loads so a value fetched
//! before the invalidation is not written back afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

/// Error delivered to waiters whose load was killed by [`ResponseCache::close`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("load of {key} aborted")]
pub struct LoadAborted {
    pub key: String,
}

/// Cache key: `chain/method/args`, with args rendered as compact JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(chain: &str, method: &str, args: &[Value]) -> Self {
        // serde_json maps are sorted, so equal args render identically.
        let args = serde_json::to_string(args).unwrap_or_default();
        Self(format!("{chain}/{method}/{args}"))
    }

    /// Prefix shared by every key of a chain.
    pub fn chain_prefix(chain: &str) -> String {
        format!("{chain}/")
    }

    /// Prefix shared by every key of one method on a chain.
    pub fn method_prefix(chain: &str, method: &str) -> String {
        format!("{chain}/{method}/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache sizing and housekeeping.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// LRU bound on the number of stored entries.
    pub max_entries: usize,
    /// Period of the expired-entry sweeper; zero disables it.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Counters describing cache behaviour since creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader executions.
    pub loads: u64,
    /// Callers that joined a load already in flight.
    pub coalesced: u64,
    /// Entries dropped by LRU pressure.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Entries and in-flight loads removed by invalidation.
    pub invalidations: u64,
    pub size: usize,
    pub inflight: usize,
    pub hit_rate: f64,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.inserted_at + self.ttl
    }
}

type SharedLoad<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct Inflight<V, E> {
    id: u64,
    load: SharedLoad<V, E>,
    abort: AbortHandle,
}

struct CacheState<V, E> {
    entries: LruCache<String, CacheEntry<V>>,
    inflight: HashMap<String, Inflight<V, E>>,
    next_load_id: u64,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

struct CacheInner<V, E> {
    name: String,
    config: CacheConfig,
    state: Mutex<CacheState<V, E>>,
    counters: Counters,
}

impl<V, E> CacheInner<V, E> {
    /// Store the result of load `id` if it is still the registered load for `key`.
    fn store(&self, key: &str, id: u64, value: V, ttl: Duration) {
        let mut state = self.state.lock();
        let current = state.inflight.get(key).map(|f| f.id) == Some(id);
        if state.closed || !current {
            tracing::debug!(cache = %self.name, key, "discarding result of detached load");
            return;
        }
        if ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        if let Some((evicted, _)) = state.entries.push(key.to_string(), entry) {
            if evicted != key {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Removes a load's in-flight registration when its task ends, however it ends.
struct LoadGuard<V, E> {
    inner: Arc<CacheInner<V, E>>,
    key: String,
    id: u64,
}

impl<V, E> Drop for LoadGuard<V, E> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.inflight.get(&self.key).map(|f| f.id) == Some(self.id) {
            state.inflight.remove(&self.key);
        }
    }
}

/// Single-flight memoizing cache. Cloning yields another handle to the
/// same cache.
pub struct ResponseCache<V, E> {
    inner: Arc<CacheInner<V, E>>,
}

impl<V, E> Clone for ResponseCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> ResponseCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<LoadAborted> + 'static,
{
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                name: name.into(),
                config,
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    inflight: HashMap::new(),
                    next_load_id: 0,
                    closed: false,
                }),
                counters: Counters::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Return the cached value for `key`, or run `loader` once for all
    /// concurrent callers and cache its successful result for `ttl`.
    ///
    /// A zero `ttl` still coalesces concurrent callers but stores nothing.
    ///
    /// Single-flight holds per registered load. A load detached by
    /// [`invalidate`](Self::invalidate), [`invalidate_prefix`](Self::invalidate_prefix),
    /// [`clear`](Self::clear) or [`insert`](Self::insert) keeps running for
    /// its waiters, and the next caller for the key starts a new load, so
    /// for a while two upstream calls for one key can overlap. Only the
    /// registered load's result is stored.
    pub async fn get_or_load<F, Fut>(&self, key: &CacheKey, ttl: Duration, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let load = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(LoadAborted {
                    key: key.to_string(),
                }
                .into());
            }
            if let Some(value) = self.lookup(&mut state, key.as_str()) {
                return Ok(value);
            }
            if let Some(inflight) = state.inflight.get(key.as_str()) {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                inflight.load.clone()
            } else {
                self.start_load(&mut state, key, ttl, loader)
            }
        };
        load.await
    }

    fn start_load<F, Fut>(
        &self,
        state: &mut CacheState<V, E>,
        key: &CacheKey,
        ttl: Duration,
        loader: F,
    ) -> SharedLoad<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.inner.counters.loads.fetch_add(1, Ordering::Relaxed);
        state.next_load_id += 1;
        let id = state.next_load_id;

        // The task must not finish before it is registered, or its guard
        // would run first and leave a stale registration behind.
        let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
        let guard = LoadGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            id,
        };
        let task: JoinHandle<Result<V, E>> = tokio::spawn(async move {
            let guard = guard;
            if go_rx.await.is_err() {
                return Err(LoadAborted { key: guard.key.clone() }.into());
            }
            let result = loader().await;
            if let Ok(value) = &result {
                guard.inner.store(&guard.key, guard.id, value.clone(), ttl);
            }
            result
        });

        let abort = task.abort_handle();
        let aborted_key = key.to_string();
        let load = async move {
            match task.await {
                Ok(result) => result,
                Err(_) => Err(LoadAborted { key: aborted_key }.into()),
            }
        }
        .boxed()
        .shared();

        state.inflight.insert(
            key.to_string(),
            Inflight {
                id,
                load: load.clone(),
                abort,
            },
        );
        let _ = go_tx.send(());
        load
    }

    /// Fresh-entry lookup that counts the hit or miss and drops an expired entry.
    fn lookup(&self, state: &mut CacheState<V, E>, key: &str) -> Option<V> {
        let now = Instant::now();
        let counters = &self.inner.counters;
        let fresh = state
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));
        match fresh {
            Some(Some(value)) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            Some(None) => {
                state.entries.pop(key);
                counters.expirations.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }
        counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Non-loading lookup.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut state = self.inner.state.lock();
        self.lookup(&mut state, key.as_str())
    }

    /// Store a value directly. A load in flight for `key` is detached so its
    /// older result cannot overwrite this one. A zero `ttl` stores nothing.
    pub fn insert(&self, key: &CacheKey, value: V, ttl: Duration) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.inflight.remove(key.as_str());
        if ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        if let Some((evicted, _)) = state.entries.push(key.to_string(), entry) {
            if evicted != key.as_str() {
                self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop one key. A load in flight for it keeps serving its current
    /// waiters but its result is not stored.
    pub fn invalidate(&self, key: &CacheKey) {
        let removed = {
            let mut state = self.inner.state.lock();
            let entry = state.entries.pop(key.as_str()).is_some() as u64;
            let load = state.inflight.remove(key.as_str()).is_some() as u64;
            entry + load
        };
        self.inner.counters.invalidations.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(cache = %self.inner.name, key = %key, removed, "cache key invalidated");
    }

    /// Drop every key starting with `prefix`, detaching matching loads.
    pub fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let removed = {
            let mut state = self.inner.state.lock();
            let stale: Vec<String> = state
                .entries
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &stale {
                state.entries.pop(key);
            }
            let before = state.inflight.len();
            state.inflight.retain(|k, _| !k.starts_with(prefix));
            (stale.len() + before - state.inflight.len()) as u64
        };
        self.inner.counters.invalidations.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(cache = %self.inner.name, prefix, removed, "cache prefix invalidated");
        removed
    }

    /// Drop everything, detaching every in-flight load.
    pub fn clear(&self) {
        let removed = {
            let mut state = self.inner.state.lock();
            let n = state.entries.len() + state.inflight.len();
            state.entries.clear();
            state.inflight.clear();
            n as u64
        };
        self.inner.counters.invalidations.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(cache = %self.inner.name, removed, "cache cleared");
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        self.inner
            .counters
            .expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Spawn the periodic expired-entry sweeper. Returns `None` when the
    /// sweep interval is zero. The task ends once the cache is closed or
    /// dropped.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.sweep_interval;
        if period.is_zero() {
            return None;
        }
        let weak: Weak<CacheInner<V, E>> = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let cache = ResponseCache { inner };
                if cache.is_closed() {
                    break;
                }
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(cache = %cache.inner.name, purged, "swept expired entries");
                }
            }
        }))
    }

    pub fn stats(&self) -> CacheStats {
        let (size, inflight) = {
            let state = self.inner.state.lock();
            (state.entries.len(), state.inflight.len())
        };
        let c = &self.inner.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            loads: c.loads.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            size,
            inflight,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Shut the cache down: in-flight loaders are aborted (their waiters
    /// get [`LoadAborted`]), entries are dropped, and later calls fail.
    pub fn close(&self) {
        let aborted = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.entries.clear();
            let loads: Vec<_> = state.inflight.drain().map(|(_, f)| f.abort).collect();
            loads
        };
        for abort in &aborted {
            abort.abort();
        }
        tracing::debug!(cache = %self.inner.name, aborted = aborted.len(), "cache closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}
