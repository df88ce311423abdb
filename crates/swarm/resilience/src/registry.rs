//! Named resilience instances.
//!
//! The registry hands out shared breakers, failover managers, bulkheads and
//! rate limiters by name. Instances are created on first use from the
//! current configuration and are never destroyed by a config reload.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::ResilienceConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::failover::{EndpointProber, FailoverManager};
use crate::rate_limiter::RateLimiter;
use crate::store::ResilienceStateStore;

/// Registry of named resilience primitives.
pub struct ResilienceRegistry {
    config: RwLock<ResilienceConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    failovers: DashMap<String, Arc<FailoverManager>>,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
    prober: Arc<dyn EndpointProber>,
    probing: Mutex<Probing>,
}

/// Probe loops started so far and the shutdown signal they watch.
#[derive(Default)]
struct Probing {
    shutdown: Option<watch::Receiver<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ResilienceRegistry {
    /// Build a registry. Configured failover groups are created eagerly.
    pub fn new(config: ResilienceConfig, prober: Arc<dyn EndpointProber>) -> ResilienceResult<Self> {
        config.validate()?;

        let failovers = DashMap::new();
        for (name, group) in &config.failover_groups {
            let manager = FailoverManager::new(name.clone(), group.clone(), prober.clone())?;
            failovers.insert(name.clone(), Arc::new(manager));
        }

        Ok(Self {
            config: RwLock::new(config),
            breakers: DashMap::new(),
            failovers,
            bulkheads: DashMap::new(),
            limiters: DashMap::new(),
            prober,
            probing: Mutex::new(Probing::default()),
        })
    }

    pub fn config(&self) -> ResilienceConfig {
        self.config.read().clone()
    }

    /// Get or create the breaker for a dependency.
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    self.config.read().breaker_config(name),
                ))
            })
            .clone()
    }

    /// The breaker for `name`, if one has been created.
    pub fn find_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Failover group by name. Groups only exist when configured.
    pub fn failover(&self, group: &str) -> ResilienceResult<Arc<FailoverManager>> {
        self.failovers
            .get(group)
            .map(|m| m.clone())
            .ok_or_else(|| ResilienceError::NotFound {
                kind: "failover group",
                name: group.to_string(),
            })
    }

    /// Failover groups whose active endpoint is `endpoint`.
    pub fn failovers_serving(&self, endpoint: &str) -> Vec<Arc<FailoverManager>> {
        self.failovers
            .iter()
            .filter(|m| m.value().active_endpoint() == endpoint)
            .map(|m| m.value().clone())
            .collect()
    }

    /// Get or create the bulkhead for a resource.
    pub fn bulkhead(&self, name: &str) -> Arc<Bulkhead> {
        self.bulkheads
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Bulkhead::new(name, self.config.read().bulkhead_config(name)))
            })
            .clone()
    }

    /// The bulkhead for `name` when the configuration names one.
    pub fn configured_bulkhead(&self, name: &str) -> Option<Arc<Bulkhead>> {
        let configured = self.config.read().bulkheads.contains_key(name);
        configured.then(|| self.bulkhead(name))
    }

    /// The rate limiter for `name` when the configuration names one.
    pub fn configured_rate_limiter(&self, name: &str) -> Option<Arc<RateLimiter>> {
        let configured = self.config.read().rate_limiters.contains_key(name);
        configured.then(|| self.rate_limiter(name))
    }

    /// Get or create the rate limiter for a resource.
    pub fn rate_limiter(&self, name: &str) -> Arc<RateLimiter> {
        self.limiters
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .config
                    .read()
                    .rate_limiters
                    .get(name)
                    .cloned()
                    .unwrap_or_default();
                Arc::new(RateLimiter::new(name, config))
            })
            .clone()
    }

    /// Current state of every breaker created so far.
    pub fn breaker_states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|b| (b.key().clone(), b.value().state()))
            .collect()
    }

    /// Apply a new configuration to live instances in place.
    ///
    /// Breaker and failover state survive. Failover groups missing from
    /// the new configuration keep running with their previous settings.
    #[instrument(skip(self, config))]
    pub fn apply_config(&self, config: ResilienceConfig) -> ResilienceResult<()> {
        config.validate()?;

        for entry in self.breakers.iter() {
            entry.value().update_config(config.breaker_config(entry.key()));
        }
        for entry in self.bulkheads.iter() {
            entry.value().update_config(config.bulkhead_config(entry.key()));
        }
        for entry in self.limiters.iter() {
            if let Some(limiter) = config.rate_limiters.get(entry.key()) {
                entry.value().update_config(limiter.clone());
            }
        }

        for (name, group) in &config.failover_groups {
            let existing = self.failovers.get(name).map(|m| m.clone());
            match existing {
                Some(manager) => manager.update_config(group.clone())?,
                None => {
                    let manager = Arc::new(FailoverManager::new(
                        name.clone(),
                        group.clone(),
                        self.prober.clone(),
                    )?);
                    let mut probing = self.probing.lock();
                    self.failovers.insert(name.clone(), manager.clone());
                    info!(group = %name, "Failover group added");
                    if let Some(shutdown) = probing.shutdown.clone() {
                        probing.tasks.push(manager.start_probing(shutdown));
                    }
                }
            }
        }
        for entry in self.failovers.iter() {
            if !config.failover_groups.contains_key(entry.key()) {
                warn!(group = %entry.key(), "Failover group absent from new config, keeping previous settings");
            }
        }

        *self.config.write() = config;
        info!("Resilience configuration applied");
        Ok(())
    }

    /// Start the probe loop of every failover group. Groups added by a
    /// later [`apply_config`](Self::apply_config) get a loop of their own.
    /// Loops stop when `shutdown` flips to `true`.
    pub fn start_probing(&self, shutdown: watch::Receiver<bool>) {
        let mut probing = self.probing.lock();
        if probing.shutdown.is_some() {
            warn!("Probe loops already running");
            return;
        }
        let loops: Vec<_> = self
            .failovers
            .iter()
            .map(|m| m.value().clone().start_probing(shutdown.clone()))
            .collect();
        probing.tasks.extend(loops);
        probing.shutdown = Some(shutdown);
    }

    /// Wait for every probe loop to stop.
    pub async fn join_probes(&self) {
        let tasks = std::mem::take(&mut self.probing.lock().tasks);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Probe loop ended abnormally");
            }
        }
    }

    /// Save breaker and failover state.
    pub async fn persist(&self, store: &dyn ResilienceStateStore) -> ResilienceResult<()> {
        let breakers: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        for snapshot in &breakers {
            store.save_breaker(snapshot).await?;
        }

        let failovers: Vec<_> = self.failovers.iter().map(|m| m.value().snapshot()).collect();
        for snapshot in &failovers {
            store.save_failover(snapshot).await?;
        }
        Ok(())
    }

    /// Restore saved state. Snapshots for unknown failover groups, or
    /// naming endpoints the group no longer has, are skipped.
    pub async fn restore(&self, store: &dyn ResilienceStateStore) -> ResilienceResult<()> {
        let breakers = store.load_breakers().await?;
        for snapshot in &breakers {
            self.circuit_breaker(&snapshot.name).restore(snapshot);
        }

        let failovers = store.load_failovers().await?;
        let mut restored = 0usize;
        for snapshot in &failovers {
            let Ok(manager) = self.failover(&snapshot.group) else {
                warn!(group = %snapshot.group, "Skipping snapshot for unknown failover group");
                continue;
            };
            match manager.restore(snapshot) {
                Ok(()) => restored += 1,
                Err(e) => warn!(group = %snapshot.group, error = %e, "Skipping failover snapshot"),
            }
        }

        info!(
            breakers = breakers.len(),
            failover_groups = restored,
            "Resilience state restored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, FailoverConfig};
    use crate::failover::StaticProber;
    use crate::store::MemoryStateStore;

    fn registry() -> ResilienceRegistry {
        let mut config = ResilienceConfig::default();
        config.breakers.insert(
            "db".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        config.failover_groups.insert(
            "api".to_string(),
            FailoverConfig::new("primary").with_secondary("backup", 1),
        );
        ResilienceRegistry::new(config, Arc::new(StaticProber::new())).unwrap()
    }

    #[test]
    fn test_get_or_create_shares_instances() {
        let registry = registry();
        let a = registry.circuit_breaker("db");
        let b = registry.circuit_breaker("db");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.config().failure_threshold, 2);
        assert_eq!(registry.circuit_breaker("cache").config().failure_threshold, 5);
    }

    #[test]
    fn test_find_does_not_create() {
        let registry = registry();
        assert!(registry.find_circuit_breaker("db").is_none());
        let created = registry.circuit_breaker("db");
        let found = registry.find_circuit_breaker("db").unwrap();
        assert!(Arc::ptr_eq(&created, &found));
        assert!(registry.find_circuit_breaker("cache").is_none());
        assert_eq!(registry.breaker_states().len(), 1);
    }

    #[test]
    fn test_unknown_failover_group() {
        let registry = registry();
        assert!(registry.failover("api").is_ok());
        assert!(matches!(
            registry.failover("payments"),
            Err(ResilienceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_failovers_serving_follows_active_endpoint() {
        let registry = registry();
        assert_eq!(registry.failovers_serving("primary").len(), 1);
        assert!(registry.failovers_serving("backup").is_empty());

        registry.failover("api").unwrap().manual_failover(None).unwrap();
        assert!(registry.failovers_serving("primary").is_empty());
        assert_eq!(registry.failovers_serving("backup").len(), 1);
    }

    #[test]
    fn test_apply_config_keeps_breaker_state() {
        let registry = registry();
        let breaker = registry.circuit_breaker("db");
        breaker.force_state(CircuitState::Open);

        let mut config = registry.config();
        config.breakers.insert(
            "db".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 7,
                ..Default::default()
            },
        );
        registry.apply_config(config).unwrap();

        let same = registry.circuit_breaker("db");
        assert!(Arc::ptr_eq(&breaker, &same));
        assert_eq!(same.state(), CircuitState::Open);
        assert_eq!(same.config().failure_threshold, 7);
    }

    #[test]
    fn test_apply_config_rejects_invalid() {
        let registry = registry();
        let mut config = registry.config();
        config
            .failover_groups
            .insert("broken".to_string(), FailoverConfig::default());
        assert!(registry.apply_config(config).is_err());
        assert!(registry.failover("broken").is_err());
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let store = MemoryStateStore::new();
        {
            let registry = registry();
            registry.circuit_breaker("db").force_state(CircuitState::Open);
            registry.failover("api").unwrap().manual_failover(None).unwrap();
            registry.persist(&store).await.unwrap();
        }

        let registry = registry();
        registry.restore(&store).await.unwrap();
        assert_eq!(registry.circuit_breaker("db").state(), CircuitState::Open);
        assert_eq!(registry.failover("api").unwrap().active_endpoint(), "backup");
    }

    #[tokio::test]
    async fn test_restore_from_empty_store_is_cold_start() {
        let store = MemoryStateStore::new();
        let registry = registry();
        registry.restore(&store).await.unwrap();
        assert!(registry.breaker_states().is_empty());
        assert_eq!(registry.failover("api").unwrap().active_endpoint(), "primary");
    }
}
