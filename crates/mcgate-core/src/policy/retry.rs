//! Exponential backoff retry policy with jitter, and the transport
//! decorator that applies it to idempotent calls.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{HealthStatus, RpcTransport};

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
    /// Add ±`jitter_fraction * backoff` random jitter (0.0 = no jitter).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Un-jittered delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }

    /// Delay before the `attempt`-th retry with random jitter applied.
    ///
    /// The jittered value stays within `[0, max_backoff]`.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        let base = self.next_delay(attempt)?;
        let fraction = self.config.jitter_fraction.clamp(0.0, 1.0);
        if fraction == 0.0 {
            return Some(base);
        }
        let base_ms = base.as_millis() as f64;
        let spread = base_ms * fraction;
        let jittered = base_ms + rng.gen_range(-spread..=spread);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(jittered.clamp(0.0, cap_ms) as u64))
    }

    /// Returns `true` if any retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

/// Decides which RPC methods are safe to retry.
///
/// The explorer only reads; the default deny-list names the MultiChain
/// calls that mutate wallet or chain state so they are never replayed.
#[derive(Debug, Clone)]
pub struct IdempotencyPolicy {
    non_idempotent: HashSet<String>,
}

impl IdempotencyPolicy {
    /// Treat every method as idempotent.
    pub fn all_idempotent() -> Self {
        Self {
            non_idempotent: HashSet::new(),
        }
    }

    /// Build a policy from an explicit deny-list.
    pub fn deny<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            non_idempotent: methods.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_idempotent(&self, method: &str) -> bool {
        !self.non_idempotent.contains(method)
    }
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self::deny([
            "sendrawtransaction",
            "send",
            "sendasset",
            "sendfrom",
            "sendwithdata",
            "sendwithdatafrom",
            "issue",
            "issuefrom",
            "issuemore",
            "create",
            "createfrom",
            "publish",
            "publishfrom",
            "grant",
            "grantfrom",
            "revoke",
            "revokefrom",
            "approvefrom",
            "completerawexchange",
            "lockunspent",
            "importaddress",
            "getnewaddress",
        ])
    }
}

/// Decorator retrying idempotent calls that fail with a transient error.
///
/// Circuit-open, RPC and pool-closed errors are surfaced immediately; after
/// the last attempt the most recent error is returned.
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
    idempotency: IdempotencyPolicy,
}

impl<T: RpcTransport> RetryTransport<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self {
            inner,
            policy: RetryPolicy::new(config),
            idempotency: IdempotencyPolicy::default(),
        }
    }

    pub fn with_idempotency(mut self, idempotency: IdempotencyPolicy) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: RpcTransport> RpcTransport for RetryTransport<T> {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        if !self.idempotency.is_idempotent(&req.method) {
            return self.inner.send(req).await;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.send(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => {
                    let delay = self.policy.jittered_delay(attempt, &mut rand::thread_rng());
                    match delay {
                        Some(delay) => {
                            tracing::warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                method = %req.method,
                                url = %self.inner.url(),
                                "retrying request"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(
                                attempt,
                                error = %e,
                                method = %req.method,
                                url = %self.inner.url(),
                                "max retries exceeded"
                            );
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn health(&self) -> HealthStatus {
        self.inner.health()
    }

    fn url(&self) -> &str {
        self.inner.url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RpcId;
    use rand::rngs::mock::StepRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        }
    }

    #[test]
    fn first_retry_delay() {
        let policy = RetryPolicy::new(no_jitter(3));
        let d1 = policy.next_delay(1).unwrap();
        let d2 = policy.next_delay(2).unwrap();
        let d3 = policy.next_delay(3).unwrap();
        assert_eq!(d1.as_millis(), 100);
        assert_eq!(d2.as_millis(), 200);
        assert_eq!(d3.as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
            jitter_fraction: 0.0,
        });
        let d5 = policy.next_delay(5).unwrap();
        assert!(d5 <= Duration::from_millis(500), "d5={d5:?} exceeds max");
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter_fraction: 0.2,
            ..no_jitter(3)
        });
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let d = policy.jittered_delay(2, &mut rng).unwrap().as_millis();
            assert!((160..=240).contains(&d), "jittered delay {d}ms out of range");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy::new(no_jitter(3));
        let mut rng = StepRng::new(0, 1);
        assert_eq!(policy.jittered_delay(1, &mut rng), Some(Duration::from_millis(100)));
    }

    #[test]
    fn should_retry_boundary() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 2,
            ..Default::default()
        });
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn default_policy_denies_mutations() {
        let p = IdempotencyPolicy::default();
        assert!(p.is_idempotent("getblock"));
        assert!(p.is_idempotent("listassets"));
        assert!(!p.is_idempotent("sendrawtransaction"));
        assert!(!p.is_idempotent("publish"));
    }

    struct Flaky {
        failures_left: AtomicU32,
        calls: Arc<AtomicU32>,
        error: TransportError,
    }

    #[async_trait]
    impl RpcTransport for Flaky {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(JsonRpcResponse::success(req.id, serde_json::json!("ok")))
        }
        fn url(&self) -> &str {
            "mock://flaky"
        }
    }

    fn flaky(failures: u32, error: TransportError) -> (Flaky, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Flaky {
                failures_left: AtomicU32::new(failures),
                calls: calls.clone(),
                error,
            },
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (inner, calls) = flaky(2, TransportError::Http("HTTP 502".into()));
        let t = RetryTransport::new(inner, no_jitter(3));
        let resp = t.send(JsonRpcRequest::new(1, "getinfo", vec![])).await.unwrap();
        assert_eq!(resp.id, RpcId::Number(1));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let (inner, calls) = flaky(10, TransportError::Timeout { ms: 5 });
        let t = RetryTransport::new(inner, no_jitter(2));
        let err = t.send(JsonRpcRequest::new(1, "getinfo", vec![])).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { ms: 5 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_open_is_not_retried() {
        let (inner, calls) = flaky(
            10,
            TransportError::CircuitOpen {
                endpoint: "mock://flaky".into(),
                retry_after: Duration::from_secs(5),
            },
        );
        let t = RetryTransport::new(inner, no_jitter(3));
        let err = t.send(JsonRpcRequest::new(1, "getinfo", vec![])).await.unwrap_err();
        assert!(matches!(err, TransportError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_methods_are_never_retried() {
        let (inner, calls) = flaky(1, TransportError::Http("HTTP 502".into()));
        let t = RetryTransport::new(inner, no_jitter(3));
        let err = t
            .send(JsonRpcRequest::new(1, "sendrawtransaction", vec![]))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
