//! Coordinator configuration and the aggregated [`SwarmConfig`] file format.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarm_healing::HealingConfig;
use swarm_recovery::RecoveryConfig;
use swarm_resilience::ResilienceConfig;

use crate::error::{OrchestratorError, OrchestratorResult};

/// How two orchestrations contesting the same resource are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Earliest created wins.
    #[default]
    FirstCome,
    /// Higher trigger priority wins, ties go to the earliest.
    Priority,
    /// Higher strategy-decision confidence wins, ties go to the earliest.
    Consensus,
}

/// Weights of the orchestration strategy scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyWeights {
    /// Score every strategy starts from.
    pub base: f64,
    /// detection_first bonus for predictive triggers.
    pub predictive: f64,
    /// detection_first bonus for low severity triggers.
    pub low_severity: f64,
    /// recovery_first bonus for high and critical triggers.
    pub urgency: f64,
    /// parallel bonus, scaled by the share of free orchestration slots.
    pub concurrency: f64,
    /// adaptive bonus, scaled by trigger confidence.
    pub confidence: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            base: 0.5,
            predictive: 0.3,
            low_severity: 0.3,
            urgency: 0.35,
            concurrency: 0.2,
            confidence: 0.25,
        }
    }
}

/// Operating targets reported in system status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTargets {
    /// Health the monitoring and verification components require.
    pub min_system_health: f64,
    pub min_effectiveness: f64,
    /// Highest acceptable cpu and memory utilization.
    pub max_utilization: f64,
}

impl Default for StatusTargets {
    fn default() -> Self {
        Self {
            min_system_health: 0.8,
            min_effectiveness: 0.7,
            max_utilization: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Orchestrations allowed to be active at once. Further triggers are
    /// refused.
    pub max_concurrent_orchestrations: usize,

    /// Completed orchestrations kept for lookup.
    pub history_limit: usize,

    /// Bound on every component run and on resource deferral.
    #[serde(rename = "default_timeout_ms", with = "swarm_types::duration_ms")]
    pub default_timeout: Duration,

    /// Best strategy score below which `adaptive` is chosen.
    pub decision_threshold: f64,

    /// Interval of the utilization and conflict scan.
    #[serde(rename = "resource_tick_ms", with = "swarm_types::duration_ms")]
    pub resource_tick: Duration,

    /// Grace period for active orchestrations on shutdown.
    #[serde(rename = "shutdown_timeout_ms", with = "swarm_types::duration_ms")]
    pub shutdown_timeout: Duration,

    pub conflict_policy: ConflictPolicy,

    /// Conflicts kept in the conflict history.
    pub conflict_history_limit: usize,

    pub strategy_weights: StrategyWeights,

    pub targets: StatusTargets,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_orchestrations: 10,
            history_limit: 200,
            default_timeout: Duration::from_secs(120),
            decision_threshold: 0.6,
            resource_tick: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            conflict_policy: ConflictPolicy::default(),
            conflict_history_limit: 100,
            strategy_weights: StrategyWeights::default(),
            targets: StatusTargets::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.max_concurrent_orchestrations == 0
            || self.history_limit == 0
            || self.conflict_history_limit == 0
        {
            return Err(OrchestratorError::Configuration(
                "orchestration caps and history limits must be positive".to_string(),
            ));
        }
        if self.default_timeout.is_zero() || self.resource_tick.is_zero() {
            return Err(OrchestratorError::Configuration(
                "default_timeout_ms and resource_tick_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(OrchestratorError::Configuration(format!(
                "decision_threshold must be within 0..=1, got {}",
                self.decision_threshold
            )));
        }
        let t = &self.targets;
        for (name, value) in [
            ("min_system_health", t.min_system_health),
            ("min_effectiveness", t.min_effectiveness),
            ("max_utilization", t.max_utilization),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OrchestratorError::Configuration(format!(
                    "targets.{} must be within 0..=1, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Everything the swarm core reads from its configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub orchestrator: OrchestratorConfig,
    pub resilience: ResilienceConfig,
    pub recovery: RecoveryConfig,
    pub healing: HealingConfig,
}

impl SwarmConfig {
    /// Read and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| OrchestratorError::ConfigLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            OrchestratorError::Configuration(reason) => OrchestratorError::ConfigLoad {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn from_toml_str(contents: &str) -> OrchestratorResult<Self> {
        toml::from_str(contents).map_err(|e| OrchestratorError::Configuration(e.to_string()))
    }

    /// Check every section.
    pub fn validate(&self) -> OrchestratorResult<()> {
        self.orchestrator.validate()?;
        self.resilience.validate()?;
        self.recovery.validate()?;
        self.healing.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        SwarmConfig::default().validate().unwrap();
    }

    #[test]
    fn test_toml_sections() {
        let config = SwarmConfig::from_toml_str(
            r#"
            [orchestrator]
            max_concurrent_orchestrations = 3
            default_timeout_ms = 5000
            conflict_policy = "priority"

            [orchestrator.strategy_weights]
            urgency = 0.4

            [resilience.breakers.db]
            failure_threshold = 3
            recovery_timeout_ms = 5000

            [recovery]
            max_concurrent_recoveries = 4

            [healing]
            match_threshold = 0.6
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.max_concurrent_orchestrations, 3);
        assert_eq!(config.orchestrator.default_timeout, Duration::from_secs(5));
        assert_eq!(config.orchestrator.conflict_policy, ConflictPolicy::Priority);
        assert_eq!(config.orchestrator.strategy_weights.urgency, 0.4);
        assert_eq!(config.orchestrator.strategy_weights.base, 0.5);
        assert_eq!(config.resilience.breaker_config("db").failure_threshold, 3);
        assert_eq!(config.recovery.max_concurrent_recoveries, 4);
        assert_eq!(config.healing.match_threshold, 0.6);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = SwarmConfig::default();
        config.orchestrator.decision_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_surfaces_subsystem_errors() {
        let mut config = SwarmConfig::default();
        config.healing.max_concurrent_healings = 0;
        assert!(matches!(config.validate(), Err(OrchestratorError::Healing(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SwarmConfig::load("/nonexistent/swarm.toml").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigLoad { .. }));
    }
}
