//! Three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions (no others are legal):
//! - `Closed` → `Open`:      `failure_threshold` failures within `failure_window`
//! - `Open` → `Half-Open`:   `open_duration` has elapsed
//! - `Half-Open` → `Closed`: `half_open_trials` trial calls succeed
//! - `Half-Open` → `Open`:   any trial call fails
//!
//! Calls are admitted through [`CircuitBreaker::try_acquire`], which hands
//! out a [`BreakerPermit`]. In Half-Open exactly `half_open_trials` permits
//! exist; a permit dropped without an outcome (cancelled caller) gives its
//! trial slot back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{HealthStatus, RpcTransport};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All requests rejected. Wait for `open_duration` before probing.
    Open,
    /// A bounded number of trial requests probe endpoint health.
    HalfOpen,
}

impl CircuitState {
    /// Whether `self → next` is one of the four legal transitions.
    pub fn can_transition_to(self, next: CircuitState) -> bool {
        matches!(
            (self, next),
            (Self::Closed, Self::Open)
                | (Self::Open, Self::HalfOpen)
                | (Self::HalfOpen, Self::Closed)
                | (Self::HalfOpen, Self::Open)
        )
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures (within `failure_window`) before opening.
    pub failure_threshold: u32,
    /// A failure streak older than this starts over.
    pub failure_window: Duration,
    /// How long to stay open before transitioning to half-open.
    pub open_duration: Duration,
    /// Number of trial calls admitted in half-open; all must succeed to close.
    pub half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            open_duration: Duration::from_secs(30),
            half_open_trials: 1,
        }
    }
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Remaining cooldown while open.
    pub retry_after: Option<Duration>,
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    streak_started: Option<Instant>,
    opened_at: Option<Instant>,
    trials_admitted: u32,
    trial_successes: u32,
    /// Bumped on every transition so stale trial permits can be recognised.
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Origin {
    /// Admitted while closed.
    Regular,
    /// Trial admitted in the half-open phase of the given generation.
    Trial(u64),
    /// Outcome reported directly, without a permit.
    Current,
}

/// Thread-safe circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitInner>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("breaker", config)
    }

    /// Create a breaker whose log lines carry `name` (usually the endpoint URL).
    pub fn named(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                streak_started: None,
                opened_at: None,
                trials_admitted: 0,
                trial_successes: 0,
                generation: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state, transitioning Open→HalfOpen if the wait has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Current state plus failure count and remaining cooldown.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            retry_after: self.remaining_cooldown(&inner),
        }
    }

    /// Returns `true` if a call would currently be admitted.
    ///
    /// Does not reserve a trial slot; use [`try_acquire`](Self::try_acquire)
    /// to actually make a call.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.trials_admitted < self.config.half_open_trials,
        }
    }

    /// Admit one call, or return the estimated time until the breaker
    /// accepts calls again.
    pub fn try_acquire(&self) -> Result<BreakerPermit, Duration> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(self.permit(Origin::Regular)),
            CircuitState::Open => Err(self.remaining_cooldown(&inner).unwrap_or_default()),
            CircuitState::HalfOpen => {
                if inner.trials_admitted < self.config.half_open_trials {
                    inner.trials_admitted += 1;
                    tracing::debug!(
                        breaker = %self.name,
                        trial = inner.trials_admitted,
                        "admitting half-open trial"
                    );
                    Ok(self.permit(Origin::Trial(inner.generation)))
                } else {
                    Err(Duration::ZERO)
                }
            }
        }
    }

    /// Record a successful request without a permit.
    pub fn record_success(&self) {
        self.settle(true, Origin::Current);
    }

    /// Record a failed request without a permit.
    pub fn record_failure(&self) {
        self.settle(false, Origin::Current);
    }

    fn permit(&self, origin: Origin) -> BreakerPermit {
        BreakerPermit {
            breaker: self.clone(),
            origin,
            settled: false,
        }
    }

    fn remaining_cooldown(&self, inner: &CircuitInner) -> Option<Duration> {
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(self.config.open_duration.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }

    fn maybe_half_open(&self, inner: &mut CircuitInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            if opened_at.elapsed() >= self.config.open_duration {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut CircuitInner, next: CircuitState) {
        debug_assert!(
            inner.state.can_transition_to(next),
            "illegal breaker transition {} → {}",
            inner.state,
            next
        );
        inner.generation += 1;
        inner.trials_admitted = 0;
        inner.trial_successes = 0;
        match next {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                tracing::warn!(
                    breaker = %self.name,
                    from = %inner.state,
                    failures = inner.failure_count,
                    "circuit breaker → open"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "circuit breaker → half-open");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.streak_started = None;
                inner.opened_at = None;
                tracing::info!(breaker = %self.name, "circuit breaker → closed");
            }
        }
        inner.state = next;
    }

    fn settle(&self, success: bool, origin: Origin) {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => {
                if success {
                    inner.failure_count = 0;
                    inner.streak_started = None;
                    return;
                }
                let now = Instant::now();
                let stale = inner
                    .streak_started
                    .map(|start| now.duration_since(start) > self.config.failure_window)
                    .unwrap_or(true);
                if stale {
                    inner.failure_count = 0;
                    inner.streak_started = Some(now);
                }
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                let counts = match origin {
                    Origin::Trial(generation) => generation == inner.generation,
                    Origin::Current => true,
                    Origin::Regular => false,
                };
                if !counts {
                    return;
                }
                if success {
                    inner.trial_successes += 1;
                    if inner.trial_successes >= self.config.half_open_trials {
                        self.transition(&mut inner, CircuitState::Closed);
                    }
                } else {
                    tracing::warn!(breaker = %self.name, "half-open trial failed");
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.trials_admitted = inner.trials_admitted.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure). Dropping it unreported releases a
/// half-open trial slot and records nothing.
#[must_use = "report the call outcome or drop the permit explicitly"]
pub struct BreakerPermit {
    breaker: CircuitBreaker,
    origin: Origin,
    settled: bool,
}

impl BreakerPermit {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(true, self.origin);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(false, self.origin);
    }

    /// Whether this permit is a half-open trial.
    pub fn is_trial(&self) -> bool {
        matches!(self.origin, Origin::Trial(_))
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Origin::Trial(generation) = self.origin {
            self.breaker.release_trial(generation);
        }
    }
}

/// Decorator applying a [`CircuitBreaker`] to one endpoint transport.
///
/// While the breaker is open, calls fail with
/// [`TransportError::CircuitOpen`] without reaching the inner transport.
/// Endpoint failures count against the breaker and are still returned to
/// the caller; daemon-reported RPC errors count as successes.
pub struct CircuitBreakerTransport<T> {
    inner: T,
    breaker: CircuitBreaker,
}

impl<T: RpcTransport> CircuitBreakerTransport<T> {
    pub fn new(inner: T, config: CircuitBreakerConfig) -> Self {
        let breaker = CircuitBreaker::named(inner.url().to_string(), config);
        Self { inner, breaker }
    }

    /// Wrap `inner` with an existing (possibly shared) breaker.
    pub fn with_breaker(inner: T, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: RpcTransport> RpcTransport for CircuitBreakerTransport<T> {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let permit = self.breaker.try_acquire().map_err(|retry_after| {
            tracing::debug!(
                endpoint = %self.inner.url(),
                method = %req.method,
                retry_after_ms = retry_after.as_millis() as u64,
                "circuit open, failing fast"
            );
            TransportError::CircuitOpen {
                endpoint: self.inner.url().to_string(),
                retry_after,
            }
        })?;

        match self.inner.send(req).await {
            Ok(resp) => {
                permit.success();
                Ok(resp)
            }
            Err(e) if e.is_endpoint_failure() => {
                permit.failure();
                Err(e)
            }
            Err(e) => {
                drop(permit);
                Err(e)
            }
        }
    }

    fn health(&self) -> HealthStatus {
        match self.breaker.state() {
            CircuitState::Open => HealthStatus::Unhealthy,
            CircuitState::HalfOpen if !self.breaker.is_allowed() => HealthStatus::Unhealthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Closed => match self.inner.health() {
                HealthStatus::Unknown => HealthStatus::Healthy,
                other => other,
            },
        }
    }

    fn url(&self) -> &str {
        self.inner.url()
    }
}
