//! Action executor wrapped in the registry's protection.
//!
//! Every action passes the rate limiter and bulkhead configured for its
//! target, then runs behind the target's circuit breaker. Outcomes feed the
//! breaker, so repeated failures against one target open its circuit and
//! later actions on it are rejected without reaching the inner executor.

use std::sync::Arc;

use async_trait::async_trait;
use swarm_types::{Action, ActionError, ActionExecutor, ActionReport, ActionResult, Trigger};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ResilienceError;
use crate::registry::ResilienceRegistry;

pub struct ProtectedExecutor {
    inner: Arc<dyn ActionExecutor>,
    registry: Arc<ResilienceRegistry>,
}

impl ProtectedExecutor {
    pub fn new(inner: Arc<dyn ActionExecutor>, registry: Arc<ResilienceRegistry>) -> Self {
        Self { inner, registry }
    }

    /// Run the action behind its target's breaker. The breaker owns the
    /// action timeout.
    async fn guarded(&self, action: &Action, trigger: &Trigger) -> ActionResult<ActionReport> {
        let breaker = self.registry.circuit_breaker(&action.target);
        let permit = breaker.try_acquire().map_err(|e| rejected(action, e))?;

        let started = Instant::now();
        match tokio::time::timeout(action.timeout, self.inner.execute(action, trigger)).await {
            Ok(Ok(report)) => {
                permit.success(started.elapsed());
                Ok(report)
            }
            // says nothing about the target's health
            Ok(Err(e @ ActionError::Unsupported { .. })) => {
                drop(permit);
                Err(e)
            }
            Ok(Err(e)) => {
                permit.failure(e.is_timeout());
                Err(e)
            }
            Err(_) => {
                permit.failure(true);
                Err(ActionError::TimedOut {
                    action_id: action.id.clone(),
                    timeout_ms: action.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl ActionExecutor for ProtectedExecutor {
    async fn execute(&self, action: &Action, trigger: &Trigger) -> ActionResult<ActionReport> {
        self.execute_bounded(action, trigger).await
    }

    async fn execute_bounded(
        &self,
        action: &Action,
        trigger: &Trigger,
    ) -> ActionResult<ActionReport> {
        if let Some(limiter) = self.registry.configured_rate_limiter(&action.target) {
            limiter
                .acquire_within(action.timeout)
                .await
                .map_err(|e| rejected(action, e))?;
        }

        match self.registry.configured_bulkhead(&action.target) {
            Some(bulkhead) => bulkhead
                .execute(|| self.guarded(action, trigger))
                .await
                .map_err(|e| rejected(action, e))?,
            None => self.guarded(action, trigger).await,
        }
    }
}

fn rejected(action: &Action, error: ResilienceError) -> ActionError {
    if error.is_rejection() {
        warn!(action = %action, error = %error, "Action rejected");
    } else {
        debug!(action = %action, error = %error, "Action not admitted");
    }
    ActionError::Failed {
        action_id: action.id.clone(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use swarm_types::{ActionType, Severity, SimulatedActionExecutor};

    use crate::circuit_breaker::CircuitState;
    use crate::config::{BulkheadConfig, CircuitBreakerConfig, RateLimiterConfig, ResilienceConfig};
    use crate::failover::StaticProber;

    fn trigger() -> Trigger {
        Trigger::new("agent_timeout", Severity::Medium, "agent").with_source("agent-1")
    }

    fn restart() -> Action {
        Action::new("restart", ActionType::Restart, "agent-1")
    }

    fn protected(
        executor: SimulatedActionExecutor,
        config: ResilienceConfig,
    ) -> (ProtectedExecutor, Arc<SimulatedActionExecutor>, Arc<ResilienceRegistry>) {
        let executor = Arc::new(executor);
        let registry =
            Arc::new(ResilienceRegistry::new(config, Arc::new(StaticProber::new())).unwrap());
        (
            ProtectedExecutor::new(executor.clone(), registry.clone()),
            executor,
            registry,
        )
    }

    fn tight_breaker() -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.breakers.insert(
            "agent-1".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(30),
                ..Default::default()
            },
        );
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_open_target_breaker() {
        let (protected, executor, registry) =
            protected(SimulatedActionExecutor::new().fail_action("restart"), tight_breaker());

        for _ in 0..2 {
            let err = protected.execute(&restart(), &trigger()).await.unwrap_err();
            assert!(err.to_string().contains("Simulated failure"));
        }
        let breaker = registry.find_circuit_breaker("agent-1").unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = protected.execute(&restart(), &trigger()).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
        assert_eq!(executor.call_count("restart"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_action_times_out_once() {
        let (protected, _, registry) = protected(
            SimulatedActionExecutor::new().delay_action("restart", Duration::from_secs(60)),
            tight_breaker(),
        );
        let action = restart().with_timeout(Duration::from_millis(100));

        let err = swarm_types::execute_with_timeout(&protected, &action, &trigger())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::TimedOut {
                action_id: "restart".to_string(),
                timeout_ms: 100,
            }
        );
        let stats = registry.find_circuit_breaker("agent-1").unwrap().stats();
        assert_eq!(stats.total_timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_action_leaves_breaker_closed() {
        struct Refusing;

        #[async_trait]
        impl ActionExecutor for Refusing {
            async fn execute(&self, action: &Action, _: &Trigger) -> ActionResult<ActionReport> {
                Err(ActionError::Unsupported {
                    action_id: action.id.clone(),
                    reason: "no handler".to_string(),
                })
            }
        }

        let registry =
            Arc::new(ResilienceRegistry::new(tight_breaker(), Arc::new(StaticProber::new())).unwrap());
        let protected = ProtectedExecutor::new(Arc::new(Refusing), registry.clone());
        for _ in 0..3 {
            assert!(protected.execute(&restart(), &trigger()).await.is_err());
        }
        assert_eq!(
            registry.find_circuit_breaker("agent-1").unwrap().state(),
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_bulkhead_and_limiter_apply() {
        let mut config = ResilienceConfig::default();
        config.bulkheads.insert(
            "agent-1".to_string(),
            BulkheadConfig {
                max_concurrent_calls: 1,
                max_queue_size: 0,
                ..Default::default()
            },
        );
        config.rate_limiters.insert(
            "agent-1".to_string(),
            RateLimiterConfig {
                refill_per_second: 1.0,
                burst: 1.0,
            },
        );
        let (protected, executor, registry) = protected(
            SimulatedActionExecutor::new().delay_action("restart", Duration::from_secs(1)),
            config,
        );

        protected.execute(&restart(), &trigger()).await.unwrap();
        assert_eq!(registry.bulkhead("agent-1").stats().completed, 1);

        let fast = restart().with_timeout(Duration::from_millis(10));
        let slow = restart();
        let (trigger_a, trigger_b) = (trigger(), trigger());
        let (first, second) = tokio::join!(
            protected.execute(&slow, &trigger_a),
            protected.execute(&fast, &trigger_b),
        );
        assert!(first.is_ok());
        assert!(second.unwrap_err().to_string().contains("rate limited"));
        assert_eq!(executor.call_count("restart"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_target_creates_only_a_breaker() {
        let (protected, _, registry) =
            protected(SimulatedActionExecutor::new(), ResilienceConfig::default());
        protected.execute(&restart(), &trigger()).await.unwrap();

        assert!(registry.configured_bulkhead("agent-1").is_none());
        assert!(registry.configured_rate_limiter("agent-1").is_none());
        assert_eq!(
            registry.breaker_states().get("agent-1"),
            Some(&CircuitState::Closed)
        );
    }
}
