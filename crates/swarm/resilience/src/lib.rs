//! # Swarm Resilience - Protecting calls to flaky dependencies
//!
//! Primitives the recovery core wraps around anything that can fail:
//!
//! - [`CircuitBreaker`]: stops calling a dependency after repeated failures
//!   and probes it again after a recovery timeout
//! - [`FailoverManager`]: moves traffic from a failing primary to the
//!   healthiest secondary and optionally back again
//! - [`Bulkhead`]: caps concurrency per resource with a bounded FIFO queue
//! - [`RateLimiter`]: token bucket admission
//! - [`ResilienceRegistry`]: named instances, hot config reload and state
//!   persistence through a [`ResilienceStateStore`]
//! - [`ProtectedExecutor`]: runs remediation actions behind the breaker,
//!   bulkhead and rate limiter of their target
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swarm_resilience::{ResilienceConfig, ResilienceRegistry, StaticProber};
//!
//! # async fn example() -> swarm_resilience::ResilienceResult<()> {
//! let registry = ResilienceRegistry::new(ResilienceConfig::default(), Arc::new(StaticProber::new()))?;
//!
//! let breaker = registry.circuit_breaker("inventory-db");
//! let rows = breaker
//!     .call(|| async { Ok::<_, String>(42) })
//!     .await?;
//! assert_eq!(rows, 42);
//! # Ok(())
//! # }
//! ```
//!
//! Every state change is logged through `tracing` and published on a
//! broadcast channel (see [`CircuitBreaker::subscribe`] and
//! [`FailoverManager::subscribe`]).

#![deny(unsafe_code)]

pub mod bulkhead;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod executor;
pub mod failover;
pub mod rate_limiter;
pub mod registry;
pub mod store;

pub use bulkhead::{Bulkhead, BulkheadStats};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerSnapshot, CircuitBreakerStats, CircuitState,
    CircuitStateChange,
};
pub use config::{
    BulkheadConfig, CircuitBreakerConfig, FailoverConfig, RateLimiterConfig, ResilienceConfig,
    SecondaryEndpoint,
};
pub use error::{ResilienceError, ResilienceResult};
pub use executor::ProtectedExecutor;
pub use failover::{
    EndpointProber, FailoverEvent, FailoverManager, FailoverSnapshot, FailoverState,
    HealthStatus, StaticProber,
};
pub use rate_limiter::RateLimiter;
pub use registry::ResilienceRegistry;
pub use store::{MemoryStateStore, ResilienceStateStore};
