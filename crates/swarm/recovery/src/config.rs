//! Recovery engine configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarm_types::Severity;

use crate::error::{RecoveryError, RecoveryResult};
use crate::strategy::{RecoveryStrategy, StrategyType};

/// Configuration for the recovery workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Workflows allowed to be active at once.
    pub max_concurrent_recoveries: usize,

    /// Completed workflows kept for lookup.
    pub history_limit: usize,

    /// Prior attempts kept for scoring context.
    pub attempt_log_limit: usize,

    /// Deepest rollback chain a strategy action may declare.
    pub max_rollback_depth: usize,

    pub scoring: ScoringConfig,

    pub verification: VerificationConfig,

    pub safety: SafetyConfig,

    /// Strategy catalog. Empty means the built-in catalog.
    pub strategies: Vec<RecoveryStrategy>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recoveries: 10,
            history_limit: 100,
            attempt_log_limit: 1000,
            max_rollback_depth: 3,
            scoring: ScoringConfig::default(),
            verification: VerificationConfig::default(),
            safety: SafetyConfig::default(),
            strategies: Vec::new(),
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> RecoveryResult<()> {
        if self.max_concurrent_recoveries == 0 {
            return Err(RecoveryError::Configuration(
                "max_concurrent_recoveries must be positive".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(RecoveryError::Configuration(
                "history_limit must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for strategy in &self.strategies {
            if !seen.insert(strategy.id.as_str()) {
                return Err(RecoveryError::InvalidStrategy {
                    strategy_id: strategy.id.clone(),
                    reason: "duplicate strategy id".to_string(),
                });
            }
            strategy.validate(self.max_rollback_depth)?;
        }
        Ok(())
    }
}

/// Points awarded per trigger severity, indexed low, medium, high, critical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityTable {
    pub standard: [f64; 4],
    pub aggressive: [f64; 4],
    pub conservative: [f64; 4],
    pub emergency: [f64; 4],
}

impl Default for SeverityTable {
    fn default() -> Self {
        Self {
            standard: [10.0, 20.0, 10.0, 0.0],
            aggressive: [0.0, 10.0, 20.0, 15.0],
            conservative: [20.0, 15.0, 5.0, 0.0],
            emergency: [0.0, 0.0, 10.0, 30.0],
        }
    }
}

impl SeverityTable {
    pub fn points(&self, strategy_type: StrategyType, severity: Severity) -> f64 {
        let row = match strategy_type {
            StrategyType::Standard => &self.standard,
            StrategyType::Aggressive => &self.aggressive,
            StrategyType::Conservative => &self.conservative,
            StrategyType::Emergency => &self.emergency,
        };
        row[severity.rank() as usize]
    }
}

/// Strategy scoring constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_score: f64,
    pub severity_table: SeverityTable,

    /// Multiplier for the historical success rate.
    pub history_weight: f64,

    /// CPU or memory above this penalises aggressive and emergency strategies.
    pub high_load_threshold: f64,
    pub high_load_penalty: f64,

    /// CPU or memory above this favours conservative strategies.
    pub elevated_load_threshold: f64,
    pub conservative_load_bonus: f64,

    /// Emergency strategies gain this when allowed downtime is below the limit.
    pub emergency_downtime_bonus: f64,
    #[serde(rename = "emergency_downtime_limit_ms", with = "swarm_types::duration_ms")]
    pub emergency_downtime_limit: Duration,

    pub business_hours_bonus: f64,

    /// Window in which same-strategy failures reduce confidence.
    #[serde(rename = "recent_failure_window_ms", with = "swarm_types::duration_ms")]
    pub recent_failure_window: Duration,
    pub recent_failure_decay: f64,
    pub cooldown_factor: f64,
    pub min_confidence_factor: f64,
    pub max_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 50.0,
            severity_table: SeverityTable::default(),
            history_weight: 20.0,
            high_load_threshold: 0.8,
            high_load_penalty: 10.0,
            elevated_load_threshold: 0.7,
            conservative_load_bonus: 10.0,
            emergency_downtime_bonus: 15.0,
            emergency_downtime_limit: Duration::from_secs(60),
            business_hours_bonus: 10.0,
            recent_failure_window: Duration::from_secs(5 * 60),
            recent_failure_decay: 0.5,
            cooldown_factor: 0.3,
            min_confidence_factor: 0.1,
            max_score: 100.0,
        }
    }
}

/// Post-execution verification thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Aggregate system health must exceed this.
    pub system_health_threshold: f64,

    /// Every affected component's health must exceed this.
    pub component_health_threshold: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            system_health_threshold: 0.8,
            component_health_threshold: 0.7,
        }
    }
}

/// Safety gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Failed workflows within the cascade window that trip the breaker.
    pub max_cascading_failures: usize,

    #[serde(rename = "cascade_window_ms", with = "swarm_types::duration_ms")]
    pub cascade_window: Duration,

    /// Trigger types only emergency strategies may handle.
    pub emergency_trigger_types: Vec<String>,

    /// Consecutive failed workflows from one source before it is quarantined.
    pub quarantine_after_failures: u32,

    #[serde(rename = "quarantine_duration_ms", with = "swarm_types::duration_ms")]
    pub quarantine_duration: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_cascading_failures: 5,
            cascade_window: Duration::from_secs(60),
            emergency_trigger_types: vec![
                "cascading_failure".to_string(),
                "data_corruption".to_string(),
                "security_breach".to_string(),
            ],
            quarantine_after_failures: 3,
            quarantine_duration: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::MatchCondition;
    use swarm_types::{Action, ActionType};

    #[test]
    fn test_severity_table_lookup() {
        let table = SeverityTable::default();
        assert_eq!(table.points(StrategyType::Standard, Severity::Medium), 20.0);
        assert_eq!(table.points(StrategyType::Emergency, Severity::Critical), 30.0);
        assert_eq!(table.points(StrategyType::Conservative, Severity::Low), 20.0);
    }

    #[test]
    fn test_rejects_deep_rollback_chain() {
        let deep = Action::new("restart", ActionType::Restart, "svc").with_rollback(
            Action::new("rb1", ActionType::Rollback, "svc").with_rollback(
                Action::new("rb2", ActionType::Rollback, "svc")
                    .with_rollback(Action::new("rb3", ActionType::Rollback, "svc")),
            ),
        );
        let config = RecoveryConfig {
            max_rollback_depth: 2,
            strategies: vec![RecoveryStrategy::new(
                "deep",
                StrategyType::Standard,
                MatchCondition::any(),
                vec![deep],
            )],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RecoveryError::InvalidStrategy { .. })
        ));
    }

    #[test]
    fn test_toml_defaults() {
        let config: RecoveryConfig = toml::from_str(
            r#"
            max_concurrent_recoveries = 4

            [scoring]
            cooldown_factor = 0.5

            [safety]
            quarantine_duration_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_recoveries, 4);
        assert_eq!(config.scoring.cooldown_factor, 0.5);
        assert_eq!(config.scoring.base_score, 50.0);
        assert_eq!(config.safety.quarantine_duration, Duration::from_secs(1));
        assert_eq!(config.safety.quarantine_after_failures, 3);
    }
}
