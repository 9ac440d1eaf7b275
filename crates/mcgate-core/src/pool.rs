//! Bounded connection pool with scoped (RAII) checkout.
//!
//! A pool owns up to `max_connections` reusable transport handles for one
//! endpoint. [`ConnectionPool::checkout`] waits at most `checkout_timeout`
//! for a free slot and hands back a [`PooledConnection`] guard. The guard
//! returns its handle to the pool when dropped, including when the future
//! that held it is cancelled.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::TransportError;

/// Pool sizing and checkout behaviour.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once.
    pub max_connections: usize,
    /// How long `checkout` waits for a free connection.
    pub checkout_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            checkout_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters describing a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub max_connections: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Handles built over the pool's lifetime (grows when broken ones are replaced).
    pub created: u64,
    pub closed: bool,
}

type Factory<C> = Box<dyn Fn() -> Result<C, TransportError> + Send + Sync>;

/// Bounded pool of reusable connection handles of type `C`.
pub struct ConnectionPool<C> {
    name: String,
    config: PoolConfig,
    idle: Mutex<Vec<C>>,
    permits: Arc<Semaphore>,
    factory: Factory<C>,
    created: AtomicU64,
    closed: AtomicBool,
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Build an empty pool; handles are created lazily by `factory`.
    pub fn new<F>(name: impl Into<String>, config: PoolConfig, factory: F) -> Arc<Self>
    where
        F: Fn() -> Result<C, TransportError> + Send + Sync + 'static,
    {
        let max = config.max_connections.max(1);
        Arc::new(Self {
            name: name.into(),
            idle: Mutex::new(Vec::with_capacity(max)),
            permits: Arc::new(Semaphore::new(max)),
            config: PoolConfig {
                max_connections: max,
                ..config
            },
            factory: Box::new(factory),
            created: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check a connection out, waiting up to the configured timeout.
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledConnection<C>, TransportError> {
        let timeout = self.config.checkout_timeout;
        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(TransportError::Closed),
            Err(_) => {
                tracing::warn!(
                    pool = %self.name,
                    max = self.config.max_connections,
                    timeout_ms = timeout.as_millis() as u64,
                    "connection pool exhausted"
                );
                return Err(TransportError::PoolTimeout {
                    endpoint: self.name.clone(),
                    ms: timeout.as_millis() as u64,
                });
            }
        };

        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = (self.factory)()?;
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pool = %self.name, "opened pooled connection");
                conn
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            discard: false,
            _permit: permit,
        })
    }

    /// Close the pool: pending and future checkouts fail with
    /// [`TransportError::Closed`], idle handles are dropped, and handles
    /// still checked out are dropped when their guards are.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let dropped = {
            let mut idle = self.idle.lock();
            let n = idle.len();
            idle.clear();
            n
        };
        tracing::debug!(pool = %self.name, dropped, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let max = self.config.max_connections;
        PoolStats {
            max_connections: max,
            idle: self.idle.lock().len(),
            in_use: max.saturating_sub(self.permits.available_permits()),
            created: self.created.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    fn give_back(&self, conn: C) {
        if self.is_closed() {
            return;
        }
        self.idle.lock().push(conn);
    }
}

/// A checked-out connection. Dereferences to the handle.
pub struct PooledConnection<C: Send + 'static> {
    pool: Arc<ConnectionPool<C>>,
    conn: Option<C>,
    discard: bool,
    // Released after `drop` has returned the handle, so the next waiter
    // finds it idle.
    _permit: OwnedSemaphorePermit,
}

impl<C: Send + 'static> PooledConnection<C> {
    /// Mark the handle as broken: it is dropped instead of being reused,
    /// and the next checkout builds a fresh one.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<C: Send + 'static> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `drop` takes the handle out.
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl<C: Send + 'static> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl<C: Send + 'static> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.discard {
                tracing::debug!(pool = %self.pool.name, "discarding broken connection");
            } else {
                self.pool.give_back(conn);
            }
        }
    }
}
