//! Safety gate for recovery strategies.
//!
//! Vetoes a candidate when the cascading-failure breaker has tripped, when
//! an emergency-only trigger type meets a non-emergency strategy, or when
//! the trigger's source is quarantined.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use swarm_types::Trigger;
use tracing::{info, warn};

use crate::config::SafetyConfig;
use crate::strategy::{RecoveryStrategy, StrategyType};

/// Why a strategy may not run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Veto {
    CascadeBreakerTripped { recent_failures: usize },
    EmergencyOnly { trigger_type: String },
    SourceQuarantined { source: String, until: DateTime<Utc> },
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Veto::CascadeBreakerTripped { recent_failures } => write!(
                f,
                "cascading-failure breaker tripped ({} recent failed workflows)",
                recent_failures
            ),
            Veto::EmergencyOnly { trigger_type } => write!(
                f,
                "trigger type {} may only be handled by an emergency strategy",
                trigger_type
            ),
            Veto::SourceQuarantined { source, until } => {
                write!(f, "source {} quarantined until {}", source, until)
            }
        }
    }
}

#[derive(Default)]
struct SafetyState {
    recent_failures: VecDeque<DateTime<Utc>>,
    consecutive_failures: HashMap<String, u32>,
    quarantined: HashMap<String, DateTime<Utc>>,
}

/// Veto gate consulted before a strategy is selected.
pub struct SafetyMonitor {
    config: RwLock<SafetyConfig>,
    state: Mutex<SafetyState>,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: Mutex::new(SafetyState::default()),
        }
    }

    pub fn update_config(&self, config: SafetyConfig) {
        *self.config.write() = config;
    }

    /// Approve or veto `strategy` for `trigger` at time `now`.
    pub fn evaluate(
        &self,
        strategy: &RecoveryStrategy,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<(), Veto> {
        let config = self.config.read();
        let mut state = self.state.lock();

        let recent = Self::prune(&mut state, &config, now);
        if recent >= config.max_cascading_failures {
            return Err(Veto::CascadeBreakerTripped {
                recent_failures: recent,
            });
        }

        if strategy.strategy_type != StrategyType::Emergency
            && config
                .emergency_trigger_types
                .contains(&trigger.trigger_type)
        {
            return Err(Veto::EmergencyOnly {
                trigger_type: trigger.trigger_type.clone(),
            });
        }

        if let Some(until) = state.quarantined.get(&trigger.source).copied() {
            if until > now {
                return Err(Veto::SourceQuarantined {
                    source: trigger.source.clone(),
                    until,
                });
            }
            state.quarantined.remove(&trigger.source);
        }

        Ok(())
    }

    /// Record a finished workflow. Repeated failures from one source
    /// quarantine it.
    pub fn record_outcome(&self, trigger: &Trigger, success: bool, now: DateTime<Utc>) {
        let config = self.config.read();
        let mut state = self.state.lock();

        if success {
            state.consecutive_failures.remove(&trigger.source);
            return;
        }

        state.recent_failures.push_back(now);
        let count = {
            let count = state
                .consecutive_failures
                .entry(trigger.source.clone())
                .or_insert(0);
            *count += 1;
            *count
        };

        if count >= config.quarantine_after_failures {
            let until = now
                + chrono::Duration::from_std(config.quarantine_duration).unwrap_or_default();
            state.quarantined.insert(trigger.source.clone(), until);
            state.consecutive_failures.remove(&trigger.source);
            warn!(
                source = %trigger.source,
                failures = count,
                until = %until,
                "Trigger source quarantined"
            );
        }
    }

    pub fn quarantine(&self, source: &str, until: DateTime<Utc>) {
        self.state
            .lock()
            .quarantined
            .insert(source.to_string(), until);
        info!(source = %source, until = %until, "Source quarantined manually");
    }

    pub fn release(&self, source: &str) -> bool {
        self.state.lock().quarantined.remove(source).is_some()
    }

    pub fn is_quarantined(&self, source: &str, now: DateTime<Utc>) -> bool {
        self.state
            .lock()
            .quarantined
            .get(source)
            .is_some_and(|until| *until > now)
    }

    pub fn cascade_tripped(&self, now: DateTime<Utc>) -> bool {
        let config = self.config.read();
        let mut state = self.state.lock();
        Self::prune(&mut state, &config, now) >= config.max_cascading_failures
    }

    /// Drop failures older than the cascade window; returns what remains.
    fn prune(state: &mut SafetyState, config: &SafetyConfig, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(config.cascade_window).unwrap_or_default();
        while state
            .recent_failures
            .front()
            .is_some_and(|at| now - *at >= window)
        {
            state.recent_failures.pop_front();
        }
        state.recent_failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::MatchCondition;
    use swarm_types::{Action, ActionType, Severity};

    fn strategy(strategy_type: StrategyType) -> RecoveryStrategy {
        RecoveryStrategy::new(
            "s",
            strategy_type,
            MatchCondition::any(),
            vec![Action::new("restart", ActionType::Restart, "svc")],
        )
    }

    fn trigger(trigger_type: &str) -> Trigger {
        Trigger::new(trigger_type, Severity::High, "agent").with_source("detector-a")
    }

    #[test]
    fn test_emergency_only_trigger_types() {
        let safety = SafetyMonitor::new(SafetyConfig::default());
        let now = Utc::now();

        assert!(matches!(
            safety.evaluate(&strategy(StrategyType::Standard), &trigger("data_corruption"), now),
            Err(Veto::EmergencyOnly { .. })
        ));
        assert!(safety
            .evaluate(&strategy(StrategyType::Emergency), &trigger("data_corruption"), now)
            .is_ok());
    }

    #[test]
    fn test_quarantine_after_consecutive_failures() {
        let safety = SafetyMonitor::new(SafetyConfig {
            quarantine_after_failures: 2,
            max_cascading_failures: 10,
            ..Default::default()
        });
        let now = Utc::now();
        let trigger = trigger("agent_timeout");

        safety.record_outcome(&trigger, false, now);
        assert!(!safety.is_quarantined("detector-a", now));
        safety.record_outcome(&trigger, false, now);
        assert!(safety.is_quarantined("detector-a", now));

        assert!(matches!(
            safety.evaluate(&strategy(StrategyType::Standard), &trigger, now),
            Err(Veto::SourceQuarantined { .. })
        ));

        let later = now + chrono::Duration::seconds(301);
        assert!(safety
            .evaluate(&strategy(StrategyType::Standard), &trigger, later)
            .is_ok());
    }

    #[test]
    fn test_success_resets_source_failures() {
        let safety = SafetyMonitor::new(SafetyConfig {
            quarantine_after_failures: 2,
            ..Default::default()
        });
        let now = Utc::now();
        let trigger = trigger("agent_timeout");

        safety.record_outcome(&trigger, false, now);
        safety.record_outcome(&trigger, true, now);
        safety.record_outcome(&trigger, false, now);
        assert!(!safety.is_quarantined("detector-a", now));
    }

    #[test]
    fn test_cascade_breaker_trips_and_expires() {
        let safety = SafetyMonitor::new(SafetyConfig {
            max_cascading_failures: 3,
            quarantine_after_failures: 100,
            ..Default::default()
        });
        let now = Utc::now();
        for i in 0..3 {
            let trigger = Trigger::new("x", Severity::Low, "c").with_source(format!("s{}", i));
            safety.record_outcome(&trigger, false, now);
        }

        assert!(safety.cascade_tripped(now));
        assert!(matches!(
            safety.evaluate(&strategy(StrategyType::Emergency), &trigger("x"), now),
            Err(Veto::CascadeBreakerTripped { recent_failures: 3 })
        ));
        assert!(!safety.cascade_tripped(now + chrono::Duration::seconds(61)));
    }
}
