//! Recovery strategies and the conditions they apply to.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarm_types::{Action, Severity, Trigger};

use crate::error::{RecoveryError, RecoveryResult};

/// How forcefully a strategy intervenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Standard,
    Aggressive,
    Conservative,
    Emergency,
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyType::Standard => "standard",
            StrategyType::Aggressive => "aggressive",
            StrategyType::Conservative => "conservative",
            StrategyType::Emergency => "emergency",
        };
        write!(f, "{}", s)
    }
}

/// Which triggers a strategy handles. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchCondition {
    pub error_types: Vec<String>,
    pub severities: Vec<Severity>,
    pub categories: Vec<String>,
}

impl MatchCondition {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn error_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn severities(mut self, severities: impl IntoIterator<Item = Severity>) -> Self {
        self.severities = severities.into_iter().collect();
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, trigger: &Trigger) -> bool {
        (self.error_types.is_empty() || self.error_types.contains(&trigger.trigger_type))
            && (self.severities.is_empty() || self.severities.contains(&trigger.severity))
            && (self.categories.is_empty() || self.categories.contains(&trigger.category))
    }
}

/// A named, ordered plan of actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub strategy_type: StrategyType,

    #[serde(default)]
    pub condition: MatchCondition,

    pub actions: Vec<Action>,

    /// Failed attempts per trigger before the strategy is no longer offered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(
        rename = "cooldown_ms",
        with = "swarm_types::duration_ms",
        default = "default_cooldown"
    )]
    pub cooldown: Duration,

    /// Success rate below which the strategy is reported as degraded.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    /// Tie-breaker between equal scores; higher wins.
    #[serde(default)]
    pub priority: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_success_threshold() -> f64 {
    0.5
}

impl RecoveryStrategy {
    pub fn new(
        id: impl Into<String>,
        strategy_type: StrategyType,
        condition: MatchCondition,
        actions: Vec<Action>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            strategy_type,
            condition,
            actions,
            max_retries: default_max_retries(),
            cooldown: default_cooldown(),
            success_threshold: default_success_threshold(),
            priority: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, trigger: &Trigger) -> bool {
        self.condition.matches(trigger)
    }

    /// Upper bound on run time: the sum of action timeouts.
    pub fn estimated_duration(&self) -> Duration {
        self.actions.iter().map(|a| a.timeout).sum()
    }

    /// Check action ids, prerequisite ordering and rollback depth.
    pub fn validate(&self, max_rollback_depth: usize) -> RecoveryResult<()> {
        let invalid = |reason: String| RecoveryError::InvalidStrategy {
            strategy_id: self.id.clone(),
            reason,
        };

        if self.id.is_empty() {
            return Err(invalid("empty strategy id".to_string()));
        }
        if self.actions.is_empty() {
            return Err(invalid("strategy has no actions".to_string()));
        }

        let mut earlier = HashSet::new();
        for action in &self.actions {
            for prerequisite in &action.prerequisites {
                if !earlier.contains(prerequisite.as_str()) {
                    return Err(invalid(format!(
                        "action {} requires {} which does not run before it",
                        action.id, prerequisite
                    )));
                }
            }
            if action.rollback_depth() > max_rollback_depth {
                return Err(invalid(format!(
                    "action {} has a rollback chain of depth {} (max {})",
                    action.id,
                    action.rollback_depth(),
                    max_rollback_depth
                )));
            }
            if !earlier.insert(action.id.as_str()) {
                return Err(invalid(format!("duplicate action id {}", action.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_types::ActionType;

    fn trigger() -> Trigger {
        Trigger::new("agent_timeout", Severity::Medium, "agent")
    }

    #[test]
    fn test_empty_condition_matches_all() {
        assert!(MatchCondition::any().matches(&trigger()));
    }

    #[test]
    fn test_condition_filters() {
        let condition = MatchCondition::any()
            .error_types(["agent_timeout"])
            .severities([Severity::Medium, Severity::High]);
        assert!(condition.matches(&trigger()));

        let wrong_category = condition.clone().categories(["network"]);
        assert!(!wrong_category.matches(&trigger()));

        let wrong_severity = MatchCondition::any().severities([Severity::Critical]);
        assert!(!wrong_severity.matches(&trigger()));
    }

    #[test]
    fn test_prerequisite_must_run_earlier() {
        let strategy = RecoveryStrategy::new(
            "bad-order",
            StrategyType::Standard,
            MatchCondition::any(),
            vec![
                Action::new("scale", ActionType::Scale, "svc").with_prerequisite("restart"),
                Action::new("restart", ActionType::Restart, "svc"),
            ],
        );
        assert!(strategy.validate(3).is_err());
    }

    #[test]
    fn test_deserialize_strategy() {
        let strategy: RecoveryStrategy = serde_json::from_str(
            r#"{
                "id": "restart-agent",
                "type": "standard",
                "condition": {"error_types": ["agent_timeout"]},
                "actions": [{"id": "restart", "type": "restart", "target": "agent"}],
                "cooldown_ms": 1000
            }"#,
        )
        .unwrap();

        assert_eq!(strategy.cooldown, Duration::from_secs(1));
        assert_eq!(strategy.max_retries, 3);
        assert!(strategy.validate(3).is_ok());
    }
}
