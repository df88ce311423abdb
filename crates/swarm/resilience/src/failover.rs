//! Primary/secondary failover with health probing.
//!
//! A [`FailoverManager`] keeps a [`HealthStatus`] per endpoint, switches the
//! active endpoint away from a failing primary and, when configured, back
//! to it once it has been healthy for long enough.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::FailoverConfig;
use crate::error::{ResilienceError, ResilienceResult};

/// Probes a single endpoint.
#[async_trait]
pub trait EndpointProber: Send + Sync {
    /// Return the endpoint's response time, or why it is unhealthy.
    async fn probe(&self, endpoint: &str) -> Result<Duration, String>;
}

/// Health of one endpoint as seen by the probe loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub endpoint: String,
    pub healthy: bool,
    pub last_response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthStatus {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            healthy: true,
            last_response_time_ms: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_probe: None,
            last_error: None,
        }
    }

    fn record(&mut self, outcome: Result<Duration, String>) {
        self.last_probe = Some(Utc::now());
        match outcome {
            Ok(response_time) => {
                self.healthy = true;
                self.last_response_time_ms = Some(response_time.as_millis() as u64);
                self.consecutive_successes += 1;
                self.consecutive_failures = 0;
                self.last_error = None;
            }
            Err(reason) => {
                self.healthy = false;
                self.consecutive_failures += 1;
                self.consecutive_successes = 0;
                self.last_error = Some(reason);
            }
        }
    }
}

/// Which endpoint is serving traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverState {
    pub primary: String,
    pub active: String,
    pub secondaries: Vec<String>,
    pub failover_count: u64,
    pub last_failover: Option<DateTime<Utc>>,
    pub last_failback: Option<DateTime<Utc>>,
    pub in_failover: bool,
}

/// Persisted failover state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverSnapshot {
    pub group: String,
    pub active: String,
    pub failover_count: u64,
    pub last_failover: Option<DateTime<Utc>>,
    pub last_failback: Option<DateTime<Utc>>,
    pub in_failover: bool,
}

/// Emitted when the active endpoint changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailoverEvent {
    FailedOver {
        group: String,
        from: String,
        to: String,
        reason: String,
        manual: bool,
    },
    FailedBack {
        group: String,
        from: String,
        to: String,
        manual: bool,
    },
}

impl fmt::Display for FailoverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverEvent::FailedOver { group, from, to, .. } => {
                write!(f, "{}: failed over {} -> {}", group, from, to)
            }
            FailoverEvent::FailedBack { group, from, to, .. } => {
                write!(f, "{}: failed back {} -> {}", group, from, to)
            }
        }
    }
}

struct FailoverInner {
    state: FailoverState,
    health: HashMap<String, HealthStatus>,
}

/// Failover manager for one primary/secondary group.
pub struct FailoverManager {
    name: String,
    config: RwLock<FailoverConfig>,
    inner: Mutex<FailoverInner>,
    prober: Arc<dyn EndpointProber>,
    events: broadcast::Sender<FailoverEvent>,
}

impl FailoverManager {
    /// Create a manager starting cold: primary active, all endpoints
    /// presumed healthy.
    pub fn new(
        name: impl Into<String>,
        config: FailoverConfig,
        prober: Arc<dyn EndpointProber>,
    ) -> ResilienceResult<Self> {
        let name = name.into();
        config.validate(&name)?;

        let health = config
            .endpoints()
            .map(|e| (e.to_string(), HealthStatus::new(e)))
            .collect();
        let state = FailoverState {
            primary: config.primary.clone(),
            active: config.primary.clone(),
            secondaries: config
                .secondaries
                .iter()
                .map(|s| s.endpoint.clone())
                .collect(),
            failover_count: 0,
            last_failover: None,
            last_failback: None,
            in_failover: false,
        };
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            name,
            config: RwLock::new(config),
            inner: Mutex::new(FailoverInner { state, health }),
            prober,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FailoverEvent> {
        self.events.subscribe()
    }

    pub fn active_endpoint(&self) -> String {
        self.inner.lock().state.active.clone()
    }

    pub fn state(&self) -> FailoverState {
        self.inner.lock().state.clone()
    }

    /// Run one probe tick: probe every endpoint, then evaluate failover
    /// and failback.
    #[instrument(skip(self), fields(group = %self.name))]
    pub async fn probe_now(&self) {
        let (endpoints, probe_timeout) = {
            let config = self.config.read();
            let endpoints: Vec<String> = config.endpoints().map(str::to_string).collect();
            (endpoints, config.probe_timeout)
        };

        let outcomes = join_all(endpoints.into_iter().map(|endpoint| async move {
            let outcome = match tokio::time::timeout(probe_timeout, self.prober.probe(&endpoint))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(format!(
                    "probe timed out after {}ms",
                    probe_timeout.as_millis()
                )),
            };
            (endpoint, outcome)
        }))
        .await;

        let config = self.config.read().clone();
        let mut inner = self.inner.lock();
        for (endpoint, outcome) in outcomes {
            if let Err(reason) = &outcome {
                debug!(endpoint = %endpoint, reason = %reason, "Probe failed");
            }
            inner
                .health
                .entry(endpoint.clone())
                .or_insert_with(|| HealthStatus::new(&endpoint))
                .record(outcome);
        }

        self.evaluate(&mut inner, &config);
    }

    /// Spawn the periodic probe loop. It stops when `shutdown` flips to
    /// `true` or its sender is dropped.
    pub fn start_probing(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut period = self.config.read().probe_interval;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.probe_now().await;

                        let current = self.config.read().probe_interval;
                        if current != period {
                            debug!(
                                group = %self.name,
                                interval_ms = current.as_millis() as u64,
                                "Probe interval changed"
                            );
                            period = current;
                            ticker = tokio::time::interval_at(Instant::now() + period, period);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!(group = %self.name, "Probe loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Run an operation against the active endpoint.
    ///
    /// On failure, if the active endpoint is currently unhealthy, fails
    /// over immediately and retries once against the new active endpoint.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> ResilienceResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let active = self.active_endpoint();
        let first_error = match op(active.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => e.to_string(),
        };

        let retry_target = {
            let config = self.config.read().clone();
            let mut inner = self.inner.lock();
            let active_healthy = inner.health.get(&active).map(|h| h.healthy).unwrap_or(true);

            if inner.state.active != active {
                // Someone else already switched while we were running
                Some(inner.state.active.clone())
            } else if !active_healthy {
                match Self::select_target(&inner, &config, &active) {
                    Some(target) => {
                        self.fail_over(&mut inner, &target, "operation failed on unhealthy endpoint", false);
                        Some(target)
                    }
                    None => None,
                }
            } else {
                None
            }
        };

        match retry_target {
            Some(target) => op(target.clone())
                .await
                .map_err(|e| ResilienceError::OperationFailed {
                    name: format!("{}@{}", self.name, target),
                    reason: e.to_string(),
                }),
            None => Err(ResilienceError::OperationFailed {
                name: format!("{}@{}", self.name, active),
                reason: first_error,
            }),
        }
    }

    /// Operator-initiated failover, to `target` or to the best secondary.
    pub fn manual_failover(&self, target: Option<&str>) -> ResilienceResult<String> {
        let config = self.config.read().clone();
        let mut inner = self.inner.lock();
        let active = inner.state.active.clone();

        let target = match target {
            Some(endpoint) => {
                if !config.secondaries.iter().any(|s| s.endpoint == endpoint) {
                    return Err(ResilienceError::UnknownEndpoint {
                        group: self.name.clone(),
                        endpoint: endpoint.to_string(),
                    });
                }
                endpoint.to_string()
            }
            None => Self::select_target(&inner, &config, &active).ok_or_else(|| {
                ResilienceError::NoEndpointAvailable {
                    group: self.name.clone(),
                }
            })?,
        };

        if target != active {
            self.fail_over(&mut inner, &target, "manual failover", true);
        }
        Ok(target)
    }

    /// Operator-initiated failback. Refused while the primary is unhealthy.
    pub fn manual_failback(&self) -> ResilienceResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.in_failover {
            return Ok(());
        }

        let primary = inner.state.primary.clone();
        let primary_healthy = inner.health.get(&primary).map(|h| h.healthy).unwrap_or(false);
        if !primary_healthy {
            return Err(ResilienceError::FailbackRefused {
                group: self.name.clone(),
                reason: format!("primary {} is unhealthy", primary),
            });
        }

        self.fail_back(&mut inner, true);
        Ok(())
    }

    /// Replace the configuration in place. An active endpoint that is no
    /// longer part of the group resets the group to its primary.
    pub fn update_config(&self, config: FailoverConfig) -> ResilienceResult<()> {
        config.validate(&self.name)?;

        let mut inner = self.inner.lock();
        for endpoint in config.endpoints() {
            inner
                .health
                .entry(endpoint.to_string())
                .or_insert_with(|| HealthStatus::new(endpoint));
        }
        inner.health.retain(|endpoint, _| config.contains(endpoint));

        inner.state.primary = config.primary.clone();
        inner.state.secondaries = config
            .secondaries
            .iter()
            .map(|s| s.endpoint.clone())
            .collect();
        if !config.contains(&inner.state.active) {
            warn!(group = %self.name, "Active endpoint removed by config, resetting to primary");
            inner.state.active = config.primary.clone();
        }
        inner.state.in_failover = inner.state.active != inner.state.primary;

        *self.config.write() = config;
        Ok(())
    }

    /// Reset to primary-active without touching endpoint health.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state.active = inner.state.primary.clone();
        inner.state.in_failover = false;
        info!(group = %self.name, "Failover group reset to primary");
    }

    pub fn snapshot(&self) -> FailoverSnapshot {
        let inner = self.inner.lock();
        FailoverSnapshot {
            group: self.name.clone(),
            active: inner.state.active.clone(),
            failover_count: inner.state.failover_count,
            last_failover: inner.state.last_failover,
            last_failback: inner.state.last_failback,
            in_failover: inner.state.in_failover,
        }
    }

    /// Restore persisted state. Snapshots naming an endpoint outside the
    /// group are rejected.
    pub fn restore(&self, snapshot: &FailoverSnapshot) -> ResilienceResult<()> {
        if !self.config.read().contains(&snapshot.active) {
            return Err(ResilienceError::UnknownEndpoint {
                group: self.name.clone(),
                endpoint: snapshot.active.clone(),
            });
        }

        let mut inner = self.inner.lock();
        inner.state.active = snapshot.active.clone();
        inner.state.failover_count = snapshot.failover_count;
        inner.state.last_failover = snapshot.last_failover;
        inner.state.last_failback = snapshot.last_failback;
        inner.state.in_failover = snapshot.active != inner.state.primary;
        Ok(())
    }

    fn evaluate(&self, inner: &mut FailoverInner, config: &FailoverConfig) {
        let primary = inner
            .health
            .get(&config.primary)
            .cloned()
            .unwrap_or_else(|| HealthStatus::new(&config.primary));

        if !inner.state.in_failover {
            if primary.consecutive_failures >= config.failover_threshold {
                let active = inner.state.active.clone();
                match Self::select_target(inner, config, &active) {
                    Some(target) => {
                        self.fail_over(inner, &target, "primary failure threshold reached", false)
                    }
                    None => warn!(group = %self.name, "Primary failing but no secondary configured"),
                }
            }
        } else if config.automatic_failback
            && primary.consecutive_successes >= config.failback_threshold
        {
            self.fail_back(inner, false);
        }
    }

    /// Healthy secondary with the lowest response time, else the secondary
    /// with the lowest priority number.
    fn select_target(
        inner: &FailoverInner,
        config: &FailoverConfig,
        exclude: &str,
    ) -> Option<String> {
        let candidates = config.secondaries.iter().filter(|s| s.endpoint != exclude);

        let healthiest = candidates
            .clone()
            .filter_map(|s| inner.health.get(&s.endpoint).filter(|h| h.healthy))
            .min_by_key(|h| h.last_response_time_ms.unwrap_or(u64::MAX))
            .map(|h| h.endpoint.clone());

        healthiest.or_else(|| {
            candidates
                .min_by_key(|s| s.priority)
                .map(|s| s.endpoint.clone())
        })
    }

    fn fail_over(&self, inner: &mut FailoverInner, target: &str, reason: &str, manual: bool) {
        let from = std::mem::replace(&mut inner.state.active, target.to_string());
        inner.state.in_failover = inner.state.active != inner.state.primary;
        inner.state.failover_count += 1;
        inner.state.last_failover = Some(Utc::now());

        warn!(
            group = %self.name,
            from = %from,
            to = %target,
            reason = %reason,
            manual = manual,
            "Failed over"
        );
        let _ = self.events.send(FailoverEvent::FailedOver {
            group: self.name.clone(),
            from,
            to: target.to_string(),
            reason: reason.to_string(),
            manual,
        });
    }

    fn fail_back(&self, inner: &mut FailoverInner, manual: bool) {
        let primary = inner.state.primary.clone();
        let from = std::mem::replace(&mut inner.state.active, primary.clone());
        inner.state.in_failover = false;
        inner.state.last_failback = Some(Utc::now());

        info!(group = %self.name, from = %from, to = %primary, manual = manual, "Failed back to primary");
        let _ = self.events.send(FailoverEvent::FailedBack {
            group: self.name.clone(),
            from,
            to: primary,
            manual,
        });
    }
}

/// Prober whose answers are set by hand.
#[derive(Default)]
pub struct StaticProber {
    outcomes: Mutex<HashMap<String, Result<Duration, String>>>,
}

impl StaticProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, endpoint: &str, response_time: Duration) {
        self.outcomes
            .lock()
            .insert(endpoint.to_string(), Ok(response_time));
    }

    pub fn set_unhealthy(&self, endpoint: &str, reason: &str) {
        self.outcomes
            .lock()
            .insert(endpoint.to_string(), Err(reason.to_string()));
    }
}

#[async_trait]
impl EndpointProber for StaticProber {
    async fn probe(&self, endpoint: &str) -> Result<Duration, String> {
        self.outcomes
            .lock()
            .get(endpoint)
            .cloned()
            .unwrap_or(Ok(Duration::from_millis(10)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(automatic_failback: bool) -> FailoverConfig {
        FailoverConfig {
            failover_threshold: 3,
            failback_threshold: 2,
            automatic_failback,
            ..FailoverConfig::new("primary")
                .with_secondary("backup-a", 2)
                .with_secondary("backup-b", 1)
        }
    }

    fn manager(automatic_failback: bool) -> (FailoverManager, Arc<StaticProber>) {
        let prober = Arc::new(StaticProber::new());
        let manager = FailoverManager::new("api", config(automatic_failback), prober.clone()).unwrap();
        (manager, prober)
    }

    #[tokio::test]
    async fn test_fails_over_to_fastest_healthy_secondary() {
        let (manager, prober) = manager(true);
        prober.set_unhealthy("primary", "connection refused");
        prober.set_healthy("backup-a", Duration::from_millis(20));
        prober.set_healthy("backup-b", Duration::from_millis(80));

        manager.probe_now().await;
        manager.probe_now().await;
        assert_eq!(manager.active_endpoint(), "primary");

        manager.probe_now().await;
        let state = manager.state();
        assert_eq!(state.active, "backup-a");
        assert!(state.in_failover);
        assert_eq!(state.failover_count, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_priority_when_no_secondary_healthy() {
        let (manager, prober) = manager(true);
        for endpoint in ["primary", "backup-a", "backup-b"] {
            prober.set_unhealthy(endpoint, "down");
        }

        for _ in 0..3 {
            manager.probe_now().await;
        }
        assert_eq!(manager.active_endpoint(), "backup-b");
    }

    #[tokio::test]
    async fn test_automatic_failback() {
        let (manager, prober) = manager(true);
        prober.set_unhealthy("primary", "down");
        for _ in 0..3 {
            manager.probe_now().await;
        }
        assert!(manager.state().in_failover);

        prober.set_healthy("primary", Duration::from_millis(5));
        manager.probe_now().await;
        assert!(manager.state().in_failover);
        manager.probe_now().await;

        let state = manager.state();
        assert_eq!(state.active, "primary");
        assert!(!state.in_failover);
        assert!(state.last_failback.is_some());
    }

    #[tokio::test]
    async fn test_no_failback_when_disabled() {
        let (manager, prober) = manager(false);
        prober.set_unhealthy("primary", "down");
        for _ in 0..3 {
            manager.probe_now().await;
        }

        prober.set_healthy("primary", Duration::from_millis(5));
        for _ in 0..10 {
            manager.probe_now().await;
        }
        assert_ne!(manager.active_endpoint(), "primary");
    }

    #[tokio::test]
    async fn test_execute_fails_over_and_retries_once() {
        let (manager, prober) = manager(true);
        prober.set_unhealthy("primary", "down");
        manager.probe_now().await;

        let calls = Mutex::new(Vec::new());
        let result = manager
            .execute(|endpoint| {
                calls.lock().push(endpoint.clone());
                async move {
                    if endpoint == "primary" {
                        Err("refused".to_string())
                    } else {
                        Ok(endpoint)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "backup-a");
        assert_eq!(calls.lock().len(), 2);
        assert_eq!(manager.active_endpoint(), "backup-a");
    }

    #[tokio::test]
    async fn test_execute_surfaces_error_when_active_healthy() {
        let (manager, _prober) = manager(true);

        let result = manager
            .execute(|_endpoint| async { Err::<(), _>("bad request") })
            .await;

        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
        assert_eq!(manager.active_endpoint(), "primary");
    }

    #[tokio::test]
    async fn test_manual_failback_refused_while_primary_unhealthy() {
        let (manager, prober) = manager(true);
        manager.manual_failover(Some("backup-b")).unwrap();
        assert_eq!(manager.active_endpoint(), "backup-b");

        prober.set_unhealthy("primary", "down");
        manager.probe_now().await;
        assert!(matches!(
            manager.manual_failback(),
            Err(ResilienceError::FailbackRefused { .. })
        ));

        prober.set_healthy("primary", Duration::from_millis(5));
        manager.probe_now().await;
        manager.manual_failback().unwrap();
        assert_eq!(manager.active_endpoint(), "primary");
    }

    #[tokio::test]
    async fn test_manual_failover_rejects_unknown_endpoint() {
        let (manager, _prober) = manager(true);
        assert!(matches!(
            manager.manual_failover(Some("elsewhere")),
            Err(ResilienceError::UnknownEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_published() {
        let (manager, _prober) = manager(true);
        let mut events = manager.subscribe();

        manager.manual_failover(None).unwrap();

        match events.try_recv().unwrap() {
            FailoverEvent::FailedOver { to, manual, .. } => {
                assert!(manual);
                assert_eq!(to, "backup-a");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_snapshot_restore_rejects_foreign_endpoint() {
        let (manager, _prober) = manager(true);
        let mut snapshot = manager.snapshot();
        snapshot.active = "backup-b".to_string();
        manager.restore(&snapshot).unwrap();
        assert!(manager.state().in_failover);

        snapshot.active = "unknown".to_string();
        assert!(manager.restore(&snapshot).is_err());
    }
}
