//! Resilience configuration.
//!
//! Defines per-breaker, per-failover-group, per-bulkhead and per-rate-limiter
//! settings. Every value can be reloaded at runtime through
//! [`ResilienceRegistry::apply_config`](crate::ResilienceRegistry::apply_config).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResilienceError, ResilienceResult};

/// Configuration for all resilience primitives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Settings used for breakers without an explicit entry.
    pub default_breaker: CircuitBreakerConfig,

    /// Per-dependency breaker settings.
    pub breakers: HashMap<String, CircuitBreakerConfig>,

    /// Failover groups by name.
    pub failover_groups: HashMap<String, FailoverConfig>,

    /// Settings used for bulkheads without an explicit entry.
    pub default_bulkhead: BulkheadConfig,

    /// Per-resource bulkhead settings.
    pub bulkheads: HashMap<String, BulkheadConfig>,

    /// Per-resource rate limiter settings.
    pub rate_limiters: HashMap<String, RateLimiterConfig>,
}

impl ResilienceConfig {
    /// Breaker settings for a named dependency.
    pub fn breaker_config(&self, name: &str) -> CircuitBreakerConfig {
        self.breakers
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_breaker.clone())
    }

    /// Bulkhead settings for a named resource.
    pub fn bulkhead_config(&self, name: &str) -> BulkheadConfig {
        self.bulkheads
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_bulkhead.clone())
    }

    /// Check every section for inconsistent values.
    pub fn validate(&self) -> ResilienceResult<()> {
        self.default_breaker.validate("default")?;
        for (name, breaker) in &self.breakers {
            breaker.validate(name)?;
        }
        for (name, group) in &self.failover_groups {
            group.validate(name)?;
        }
        for (name, bulkhead) in &self.bulkheads {
            if bulkhead.max_concurrent_calls == 0 {
                return Err(ResilienceError::Configuration(format!(
                    "bulkhead {} must allow at least one concurrent call",
                    name
                )));
            }
        }
        for (name, limiter) in &self.rate_limiters {
            if limiter.refill_per_second <= 0.0 || limiter.burst < 1.0 {
                return Err(ResilienceError::Configuration(format!(
                    "rate limiter {} needs a positive refill rate and a burst of at least 1",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time to wait in OPEN before probing again.
    #[serde(rename = "recovery_timeout_ms", with = "swarm_types::duration_ms")]
    pub recovery_timeout: Duration,

    /// Probe calls admitted while HALF_OPEN.
    pub half_open_max_calls: u32,

    /// Timeout applied to each protected call.
    #[serde(rename = "call_timeout_ms", with = "swarm_types::duration_ms")]
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self, name: &str) -> ResilienceResult<()> {
        if self.failure_threshold == 0 || self.half_open_max_calls == 0 {
            return Err(ResilienceError::Configuration(format!(
                "breaker {}: failure_threshold and half_open_max_calls must be positive",
                name
            )));
        }
        Ok(())
    }
}

/// One secondary endpoint of a failover group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryEndpoint {
    pub endpoint: String,

    /// Lower numbers are preferred when no secondary is healthy.
    #[serde(default)]
    pub priority: u32,
}

/// Failover group configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub primary: String,

    pub secondaries: Vec<SecondaryEndpoint>,

    #[serde(rename = "probe_interval_ms", with = "swarm_types::duration_ms")]
    pub probe_interval: Duration,

    #[serde(rename = "probe_timeout_ms", with = "swarm_types::duration_ms")]
    pub probe_timeout: Duration,

    /// Consecutive primary probe failures before failing over.
    pub failover_threshold: u32,

    /// Consecutive primary probe successes before failing back.
    pub failback_threshold: u32,

    pub automatic_failback: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            primary: String::new(),
            secondaries: Vec::new(),
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            failover_threshold: 3,
            failback_threshold: 5,
            automatic_failback: true,
        }
    }
}

impl FailoverConfig {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            ..Default::default()
        }
    }

    pub fn with_secondary(mut self, endpoint: impl Into<String>, priority: u32) -> Self {
        self.secondaries.push(SecondaryEndpoint {
            endpoint: endpoint.into(),
            priority,
        });
        self
    }

    /// Primary first, then secondaries in configured order.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str())
            .chain(self.secondaries.iter().map(|s| s.endpoint.as_str()))
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints().any(|e| e == endpoint)
    }

    pub(crate) fn validate(&self, name: &str) -> ResilienceResult<()> {
        if self.primary.is_empty() {
            return Err(ResilienceError::Configuration(format!(
                "failover group {} has no primary endpoint",
                name
            )));
        }
        if self.secondaries.iter().any(|s| s.endpoint == self.primary) {
            return Err(ResilienceError::Configuration(format!(
                "failover group {} lists its primary as a secondary",
                name
            )));
        }
        if self.failover_threshold == 0 || self.failback_threshold == 0 {
            return Err(ResilienceError::Configuration(format!(
                "failover group {}: thresholds must be positive",
                name
            )));
        }
        if self.probe_interval.is_zero() {
            return Err(ResilienceError::Configuration(format!(
                "failover group {}: probe interval must be positive",
                name
            )));
        }
        Ok(())
    }
}

/// Bulkhead configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    pub max_concurrent_calls: usize,

    /// Waiting operations allowed beyond the cap.
    pub max_queue_size: usize,

    /// How long a queued operation may wait for a slot.
    #[serde(rename = "queue_timeout_ms", with = "swarm_types::duration_ms")]
    pub queue_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            max_queue_size: 20,
            queue_timeout: Duration::from_secs(5),
        }
    }
}

/// Token bucket configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Tokens added per second.
    pub refill_per_second: f64,

    /// Bucket capacity.
    pub burst: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            refill_per_second: 10.0,
            burst: 20.0,
        }
    }
}
