//! Safety gate for healing sessions.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use swarm_types::{ActionType, Trigger};

use crate::config::HealingSafetyConfig;
use crate::learning::ScenarioStats;
use crate::scenario::HealingScenario;

/// Why a scenario may not run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealingVeto {
    AlreadyHealing { scenario_id: String, source: String },
    RetriesExhausted { scenario_id: String, consecutive_failures: u32 },
    SystemHealthTooLow { health: f64, minimum: f64 },
    BlockedAction { scenario_id: String, action_type: ActionType },
}

impl fmt::Display for HealingVeto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealingVeto::AlreadyHealing {
                scenario_id,
                source,
            } => write!(f, "{} is already healing {}", scenario_id, source),
            HealingVeto::RetriesExhausted {
                scenario_id,
                consecutive_failures,
            } => write!(
                f,
                "{} failed {} times in a row and is cooling down",
                scenario_id, consecutive_failures
            ),
            HealingVeto::SystemHealthTooLow { health, minimum } => write!(
                f,
                "system health {:.2} below automated healing minimum {:.2}",
                health, minimum
            ),
            HealingVeto::BlockedAction {
                scenario_id,
                action_type,
            } => write!(f, "{} uses blocked action type {}", scenario_id, action_type),
        }
    }
}

/// Admits healing sessions and tracks which scenario is healing which source.
pub struct HealingSafetyMonitor {
    config: RwLock<HealingSafetyConfig>,
    in_progress: Mutex<HashSet<(String, String)>>,
}

impl HealingSafetyMonitor {
    pub fn new(config: HealingSafetyConfig) -> Self {
        Self {
            config: RwLock::new(config),
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn update_config(&self, config: HealingSafetyConfig) {
        *self.config.write() = config;
    }

    /// Approve `scenario` for `trigger` and claim its source. The claim is
    /// held until [`release`](Self::release).
    pub fn admit(
        &self,
        scenario: &HealingScenario,
        trigger: &Trigger,
        stats: &ScenarioStats,
        system_health: f64,
        now: DateTime<Utc>,
    ) -> Result<(), HealingVeto> {
        let config = self.config.read();

        if system_health < config.min_system_health {
            return Err(HealingVeto::SystemHealthTooLow {
                health: system_health,
                minimum: config.min_system_health,
            });
        }

        if let Some(blocked) = scenario
            .actions
            .iter()
            .map(|a| a.action.action_type)
            .find(|t| config.blocked_action_types.contains(t))
        {
            return Err(HealingVeto::BlockedAction {
                scenario_id: scenario.id.clone(),
                action_type: blocked,
            });
        }

        if stats.consecutive_failures >= scenario.max_retries
            && stats.in_cooldown(scenario.cooldown, now)
        {
            return Err(HealingVeto::RetriesExhausted {
                scenario_id: scenario.id.clone(),
                consecutive_failures: stats.consecutive_failures,
            });
        }

        let key = (scenario.id.clone(), trigger.source.clone());
        if !self.in_progress.lock().insert(key) {
            return Err(HealingVeto::AlreadyHealing {
                scenario_id: scenario.id.clone(),
                source: trigger.source.clone(),
            });
        }
        Ok(())
    }

    pub fn release(&self, scenario_id: &str, source: &str) {
        self.in_progress
            .lock()
            .remove(&(scenario_id.to_string(), source.to_string()));
    }

    pub fn in_progress(&self) -> usize {
        self.in_progress.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{HealingAction, TriggerMatcher};
    use std::time::Duration;
    use swarm_types::{Action, Severity};

    fn scenario() -> HealingScenario {
        HealingScenario::new(
            "agent-restart",
            "agent",
            vec![TriggerMatcher::event("agent_timeout", Severity::Medium)],
            vec![HealingAction::new(Action::new("restart", ActionType::Restart, "agent"))],
        )
        .with_max_retries(2)
        .with_cooldown(Duration::from_secs(60))
    }

    fn trigger() -> Trigger {
        Trigger::new("agent_timeout", Severity::Medium, "agent").with_source("agent-7")
    }

    #[test]
    fn test_one_session_per_scenario_and_source() {
        let monitor = HealingSafetyMonitor::new(HealingSafetyConfig::default());
        let stats = ScenarioStats::default();
        let now = Utc::now();

        assert!(monitor.admit(&scenario(), &trigger(), &stats, 0.9, now).is_ok());
        assert!(matches!(
            monitor.admit(&scenario(), &trigger(), &stats, 0.9, now),
            Err(HealingVeto::AlreadyHealing { .. })
        ));

        let other = trigger().with_source("agent-8");
        assert!(monitor.admit(&scenario(), &other, &stats, 0.9, now).is_ok());

        monitor.release("agent-restart", "agent-7");
        assert!(monitor.admit(&scenario(), &trigger(), &stats, 0.9, now).is_ok());
    }

    #[test]
    fn test_retries_exhausted_only_within_cooldown() {
        let monitor = HealingSafetyMonitor::new(HealingSafetyConfig::default());
        let now = Utc::now();
        let stats = ScenarioStats {
            attempts: 2,
            successes: 0,
            consecutive_failures: 2,
            last_run: Some(now - chrono::Duration::seconds(10)),
        };

        assert!(matches!(
            monitor.admit(&scenario(), &trigger(), &stats, 0.9, now),
            Err(HealingVeto::RetriesExhausted { .. })
        ));

        let later = now + chrono::Duration::seconds(120);
        assert!(monitor.admit(&scenario(), &trigger(), &stats, 0.9, later).is_ok());
    }

    #[test]
    fn test_low_health_and_blocked_actions() {
        let monitor = HealingSafetyMonitor::new(HealingSafetyConfig {
            min_system_health: 0.3,
            blocked_action_types: vec![ActionType::Restart],
        });
        let stats = ScenarioStats::default();

        assert!(matches!(
            monitor.admit(&scenario(), &trigger(), &stats, 0.1, Utc::now()),
            Err(HealingVeto::SystemHealthTooLow { .. })
        ));
        assert!(matches!(
            monitor.admit(&scenario(), &trigger(), &stats, 0.9, Utc::now()),
            Err(HealingVeto::BlockedAction { .. })
        ));
        assert_eq!(monitor.in_progress(), 0);
    }
}
