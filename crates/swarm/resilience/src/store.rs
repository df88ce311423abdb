//! Resilience state persistence
//!
//! Breaker and failover state can be saved across restarts. Nothing stored
//! means a cold start.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::circuit_breaker::CircuitBreakerSnapshot;
use crate::error::ResilienceResult;
use crate::failover::FailoverSnapshot;

/// Storage for breaker and failover snapshots
#[async_trait]
pub trait ResilienceStateStore: Send + Sync {
    /// Save (or replace) a breaker snapshot
    async fn save_breaker(&self, snapshot: &CircuitBreakerSnapshot) -> ResilienceResult<()>;

    /// All stored breaker snapshots
    async fn load_breakers(&self) -> ResilienceResult<Vec<CircuitBreakerSnapshot>>;

    /// Save (or replace) a failover snapshot
    async fn save_failover(&self, snapshot: &FailoverSnapshot) -> ResilienceResult<()>;

    /// All stored failover snapshots
    async fn load_failovers(&self) -> ResilienceResult<Vec<FailoverSnapshot>>;
}

/// In-memory implementation for development and tests
#[derive(Default)]
pub struct MemoryStateStore {
    breakers: DashMap<String, CircuitBreakerSnapshot>,
    failovers: DashMap<String, FailoverSnapshot>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty() && self.failovers.is_empty()
    }
}

#[async_trait]
impl ResilienceStateStore for MemoryStateStore {
    async fn save_breaker(&self, snapshot: &CircuitBreakerSnapshot) -> ResilienceResult<()> {
        self.breakers
            .insert(snapshot.name.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_breakers(&self) -> ResilienceResult<Vec<CircuitBreakerSnapshot>> {
        Ok(self.breakers.iter().map(|s| s.clone()).collect())
    }

    async fn save_failover(&self, snapshot: &FailoverSnapshot) -> ResilienceResult<()> {
        self.failovers
            .insert(snapshot.group.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_failovers(&self) -> ResilienceResult<Vec<FailoverSnapshot>> {
        Ok(self.failovers.iter().map(|s| s.clone()).collect())
    }
}
