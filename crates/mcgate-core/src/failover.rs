//! Round-robin failover across the endpoints of one chain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{HealthStatus, RpcTransport};

/// Health of one endpoint in a failover set.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EndpointHealth {
    pub url: String,
    pub health: HealthStatus,
}

/// Round-robin transport over several endpoint transports.
///
/// Each member is expected to carry its own circuit breaker (see
/// [`CircuitBreakerTransport`](crate::policy::CircuitBreakerTransport)), so
/// an open breaker shows up here as [`HealthStatus::Unhealthy`] and the slot
/// is skipped, as is a member that answers `CircuitOpen` after being
/// picked. When every member is unhealthy the call still goes to the
/// slot under the cursor, which fails fast with `CircuitOpen` and tells the
/// caller how long to wait.
pub struct FailoverTransport {
    members: Vec<Arc<dyn RpcTransport>>,
    cursor: AtomicUsize,
    label: String,
}

impl FailoverTransport {
    pub fn new(members: Vec<Arc<dyn RpcTransport>>) -> Self {
        let label = format!(
            "failover[{}]",
            members.iter().map(|m| m.url()).collect::<Vec<_>>().join(",")
        );
        Self {
            members,
            cursor: AtomicUsize::new(0),
            label,
        }
    }

    /// Number of endpoints in the set.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn health_summary(&self) -> Vec<EndpointHealth> {
        self.members
            .iter()
            .map(|m| EndpointHealth {
                url: m.url().to_string(),
                health: m.health(),
            })
            .collect()
    }

    /// Members in dispatch order for one call: the healthy ones starting
    /// from the cursor, or just the cursor slot when none is healthy.
    fn candidates(&self) -> Vec<&Arc<dyn RpcTransport>> {
        if self.members.is_empty() {
            return Vec::new();
        }
        let n = self.members.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        let healthy: Vec<_> = (0..n)
            .map(|i| &self.members[(start + i) % n])
            .filter(|m| m.health() != HealthStatus::Unhealthy)
            .collect();
        if healthy.is_empty() {
            tracing::warn!(endpoints = n, "every endpoint unhealthy, routing to cursor slot");
            return vec![&self.members[start]];
        }
        healthy
    }
}

#[async_trait]
impl RpcTransport for FailoverTransport {
    /// A member that rejects the call with `CircuitOpen` never saw it, so
    /// the next candidate gets it instead.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut candidates = self.candidates().into_iter().peekable();
        while let Some(member) = candidates.next() {
            tracing::trace!(endpoint = member.url(), method = %req.method, "failover dispatch");
            match member.send(req.clone()).await {
                Err(TransportError::CircuitOpen { .. }) if candidates.peek().is_some() => {
                    tracing::debug!(endpoint = member.url(), "circuit open, trying next endpoint");
                }
                other => return other,
            }
        }
        Err(TransportError::AllEndpointsDown)
    }

    fn health(&self) -> HealthStatus {
        if self.members.is_empty() {
            return HealthStatus::Unhealthy;
        }
        let healthy = self
            .members
            .iter()
            .filter(|m| m.health() != HealthStatus::Unhealthy)
            .count();
        match healthy {
            0 => HealthStatus::Unhealthy,
            n if n == self.members.len()
                && self
                    .members
                    .iter()
                    .all(|m| m.health() != HealthStatus::Degraded) =>
            {
                HealthStatus::Healthy
            }
            _ => HealthStatus::Degraded,
        }
    }

    fn url(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CircuitBreakerConfig, CircuitBreakerTransport, CircuitState};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct MockTransport {
        url: String,
        should_fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err(TransportError::Connect {
                    endpoint: self.url.clone(),
                    reason: "refused".into(),
                })
            } else {
                Ok(JsonRpcResponse::success(req.id, serde_json::json!(self.url)))
            }
        }

        fn health(&self) -> HealthStatus {
            HealthStatus::Healthy
        }

        fn url(&self) -> &str {
            &self.url
        }
    }

    fn mock(url: &str, fail: bool) -> Arc<MockTransport> {
        Arc::new(MockTransport {
            url: url.to_string(),
            should_fail: fail,
            calls: AtomicU32::new(0),
        })
    }

    fn member<T: RpcTransport>(t: Arc<T>) -> Arc<dyn RpcTransport> {
        t
    }

    fn breaker(inner: Arc<MockTransport>) -> Arc<CircuitBreakerTransport<Arc<MockTransport>>> {
        Arc::new(CircuitBreakerTransport::new(
            inner,
            CircuitBreakerConfig {
                failure_threshold: 1,
                failure_window: Duration::from_secs(60),
                open_duration: Duration::from_secs(30),
                half_open_trials: 1,
            },
        ))
    }

    #[tokio::test]
    async fn round_robin_alternates() {
        let a = mock("http://a:8570", false);
        let b = mock("http://b:8570", false);
        let fo = FailoverTransport::new(vec![member(a.clone()), member(b.clone())]);
        for i in 0..4 {
            fo.send(JsonRpcRequest::new(i, "getinfo", vec![])).await.unwrap();
        }
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
        assert_eq!(b.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn open_endpoint_is_skipped() {
        let bad = mock("http://bad:8570", true);
        let good = mock("http://good:8570", false);
        let bad_cb = breaker(bad.clone());
        let fo = FailoverTransport::new(vec![member(bad_cb.clone()), member(breaker(good.clone()))]);

        // First call lands on `bad` and trips its breaker.
        assert!(fo.send(JsonRpcRequest::new(1, "getinfo", vec![])).await.is_err());
        assert_eq!(bad_cb.health(), HealthStatus::Unhealthy);
        assert_eq!(fo.health(), HealthStatus::Degraded);

        for i in 0..4 {
            let resp = fo.send(JsonRpcRequest::new(i, "getinfo", vec![])).await.unwrap();
            assert_eq!(resp.into_result().unwrap(), "http://good:8570");
        }
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_open_fails_fast_with_circuit_open() {
        let a = mock("http://a:8570", true);
        let b = mock("http://b:8570", true);
        let fo = FailoverTransport::new(vec![member(breaker(a.clone())), member(breaker(b.clone()))]);
        for i in 0..2 {
            let _ = fo.send(JsonRpcRequest::new(i, "getinfo", vec![])).await;
        }
        assert_eq!(fo.health(), HealthStatus::Unhealthy);

        let err = fo.send(JsonRpcRequest::new(9, "getinfo", vec![])).await.unwrap_err();
        assert!(matches!(err, TransportError::CircuitOpen { .. }));
        assert_eq!(a.calls.load(Ordering::SeqCst) + b.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_endpoint_without_free_trial_is_skipped() {
        let a = mock("http://a:8570", false);
        let b = mock("http://b:8570", false);
        let a_cb = breaker(a.clone());
        a_cb.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(31)).await;

        let held = a_cb.breaker().try_acquire().unwrap();
        assert_eq!(a_cb.breaker().state(), CircuitState::HalfOpen);
        assert_eq!(a_cb.health(), HealthStatus::Unhealthy);

        let fo = FailoverTransport::new(vec![member(a_cb.clone()), member(breaker(b.clone()))]);
        for i in 0..4 {
            let resp = fo.send(JsonRpcRequest::new(i, "getinfo", vec![])).await.unwrap();
            assert_eq!(resp.into_result().unwrap(), "http://b:8570");
        }
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);

        drop(held);
        assert_eq!(a_cb.health(), HealthStatus::Degraded);
    }

    /// Reports healthy but rejects every call, like a breaker that tripped
    /// between the health check and the call.
    struct Tripped;

    #[async_trait]
    impl RpcTransport for Tripped {
        async fn send(&self, _req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            Err(TransportError::CircuitOpen {
                endpoint: "http://tripped:8570".into(),
                retry_after: Duration::from_secs(5),
            })
        }

        fn health(&self) -> HealthStatus {
            HealthStatus::Healthy
        }

        fn url(&self) -> &str {
            "http://tripped:8570"
        }
    }

    #[tokio::test]
    async fn circuit_open_answer_moves_to_next_endpoint() {
        let good = mock("http://good:8570", false);
        let fo = FailoverTransport::new(vec![member(Arc::new(Tripped)), member(good.clone())]);
        for i in 0..4 {
            let resp = fo.send(JsonRpcRequest::new(i, "getinfo", vec![])).await.unwrap();
            assert_eq!(resp.into_result().unwrap(), "http://good:8570");
        }
        assert_eq!(good.calls.load(Ordering::SeqCst), 4);

        let alone = FailoverTransport::new(vec![member(Arc::new(Tripped))]);
        let err = alone.send(JsonRpcRequest::new(9, "getinfo", vec![])).await.unwrap_err();
        assert!(matches!(err, TransportError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn empty_set_reports_all_down() {
        let fo = FailoverTransport::new(vec![]);
        let err = fo.send(JsonRpcRequest::new(1, "getinfo", vec![])).await.unwrap_err();
        assert!(matches!(err, TransportError::AllEndpointsDown));
        assert_eq!(fo.health(), HealthStatus::Unhealthy);
    }

    #[test]
    fn summary_lists_every_endpoint() {
        let fo = FailoverTransport::new(vec![
            member(mock("http://a:1", false)),
            member(mock("http://b:2", false)),
        ]);
        let summary = fo.health_summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[1].url, "http://b:2");
        assert_eq!(fo.url(), "failover[http://a:1,http://b:2]");
    }
}
