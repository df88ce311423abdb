//! Self-healing engine configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use swarm_types::ActionType;

use crate::error::{HealingError, HealingResult};
use crate::scenario::HealingScenario;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Sessions allowed to run at once.
    pub max_concurrent_healings: usize,

    /// Completed sessions kept for lookup.
    pub history_limit: usize,

    /// Minimum match score for a scenario to qualify.
    pub match_threshold: f64,

    pub selection: SelectionWeights,

    /// Action types treated as critical unless an action overrides it.
    pub critical_action_types: Vec<ActionType>,

    /// Share of executed actions that must succeed.
    pub action_success_ratio: f64,

    /// Share of verification steps that must pass to count as healed.
    pub verification_pass_ratio: f64,

    pub safety: HealingSafetyConfig,

    /// Scenario catalog. Empty means the built-in catalog.
    pub scenarios: Vec<HealingScenario>,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_healings: 5,
            history_limit: 100,
            match_threshold: 0.5,
            selection: SelectionWeights::default(),
            critical_action_types: vec![ActionType::Restart],
            action_success_ratio: 0.7,
            verification_pass_ratio: 0.8,
            safety: HealingSafetyConfig::default(),
            scenarios: Vec::new(),
        }
    }
}

impl HealingConfig {
    pub fn validate(&self) -> HealingResult<()> {
        if self.max_concurrent_healings == 0 || self.history_limit == 0 {
            return Err(HealingError::Configuration(
                "max_concurrent_healings and history_limit must be positive".to_string(),
            ));
        }
        for (name, ratio) in [
            ("match_threshold", self.match_threshold),
            ("action_success_ratio", self.action_success_ratio),
            ("verification_pass_ratio", self.verification_pass_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(HealingError::Configuration(format!(
                    "{} must be between 0 and 1, got {}",
                    name, ratio
                )));
            }
        }

        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.id.as_str()) {
                return Err(HealingError::InvalidScenario {
                    scenario_id: scenario.id.clone(),
                    reason: "duplicate scenario id".to_string(),
                });
            }
            scenario.validate()?;
        }
        Ok(())
    }
}

/// Weights of the scenario selection score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    pub category_match: f64,

    /// Awarded for an exact severity fit, minus `severity_step` per rank of gap.
    pub severity_fit: f64,
    pub severity_step: f64,

    /// Multiplied by the scenario's historical success rate.
    pub history_bonus: f64,

    /// Awarded when the scenario is outside its cooldown.
    pub cooldown_bonus: f64,

    /// Awarded for short scenarios, minus one per action.
    pub simplicity: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            category_match: 30.0,
            severity_fit: 20.0,
            severity_step: 5.0,
            history_bonus: 25.0,
            cooldown_bonus: 15.0,
            simplicity: 10.0,
        }
    }
}

/// Healing safety gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingSafetyConfig {
    /// No automated healing below this system health.
    pub min_system_health: f64,

    /// Action types never run automatically.
    pub blocked_action_types: Vec<ActionType>,
}

impl Default for HealingSafetyConfig {
    fn default() -> Self {
        Self {
            min_system_health: 0.2,
            blocked_action_types: Vec::new(),
        }
    }
}
