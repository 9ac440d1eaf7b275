//! Policy engine: composable reliability decorators.
//!
//! Each policy wraps an [`RpcTransport`](crate::transport::RpcTransport) and
//! is itself a transport, so the stack is assembled by nesting:
//! ```text
//! Request → [RetryTransport] → [FailoverTransport] → [CircuitBreakerTransport] → [HttpTransport]
//! ```
//! Retries sit outside the breakers: every attempt is seen by a breaker,
//! and a breaker that opens mid-way stops the retry loop with
//! `CircuitOpen`.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerTransport,
    CircuitState,
};
pub use retry::{IdempotencyPolicy, RetryConfig, RetryPolicy, RetryTransport};
