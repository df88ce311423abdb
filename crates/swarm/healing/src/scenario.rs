//! Healing scenario definitions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use swarm_types::{Action, ActionType, Severity};

use crate::error::{HealingError, HealingResult};

fn default_severity() -> Severity {
    Severity::Medium
}

/// Trigger field a pattern is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    #[default]
    Message,
    Type,
    Category,
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ThresholdOperator {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Gte => value >= threshold,
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Lte => value <= threshold,
        }
    }
}

/// One way a scenario recognizes a trigger. Each matcher carries the
/// severity it is meant for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerMatcher {
    /// Regular expression over a trigger field.
    Pattern {
        pattern: String,
        #[serde(default)]
        field: MatchField,
        #[serde(default = "default_severity")]
        severity: Severity,
    },

    /// Threshold on a system metric (`cpu`, `memory`, `network`,
    /// `health_score`, `error_rate`, `response_time_ms`) or on a numeric
    /// trigger context entry.
    MetricThreshold {
        metric: String,
        operator: ThresholdOperator,
        threshold: f64,
        #[serde(default = "default_severity")]
        severity: Severity,
    },

    /// Structured match on trigger fields. Unset fields are ignored; the
    /// score is the share of set fields that match.
    EventPattern {
        #[serde(default)]
        trigger_type: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        context: HashMap<String, serde_json::Value>,
        #[serde(default = "default_severity")]
        severity: Severity,
    },

    /// UTC hours (0-23) and ISO weekdays (1 = Monday). Empty means any.
    TimeBased {
        #[serde(default)]
        hours: Vec<u32>,
        #[serde(default)]
        weekdays: Vec<u32>,
        #[serde(default = "default_severity")]
        severity: Severity,
    },
}

impl TriggerMatcher {
    pub fn severity(&self) -> Severity {
        match self {
            TriggerMatcher::Pattern { severity, .. }
            | TriggerMatcher::MetricThreshold { severity, .. }
            | TriggerMatcher::EventPattern { severity, .. }
            | TriggerMatcher::TimeBased { severity, .. } => *severity,
        }
    }

    pub fn event(trigger_type: impl Into<String>, severity: Severity) -> Self {
        TriggerMatcher::EventPattern {
            trigger_type: Some(trigger_type.into()),
            category: None,
            source: None,
            context: HashMap::new(),
            severity,
        }
    }

    pub fn pattern(pattern: impl Into<String>, field: MatchField, severity: Severity) -> Self {
        TriggerMatcher::Pattern {
            pattern: pattern.into(),
            field,
            severity,
        }
    }

    pub fn metric(
        metric: impl Into<String>,
        operator: ThresholdOperator,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        TriggerMatcher::MetricThreshold {
            metric: metric.into(),
            operator,
            threshold,
            severity,
        }
    }
}

/// An action inside a scenario, with the actions it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingAction {
    pub action: Action,

    /// Ids of earlier actions that must have completed in this session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Overrides the configured critical action types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,
}

impl HealingAction {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            dependencies: Vec::new(),
            critical: None,
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = Some(critical);
        self
    }

    pub fn id(&self) -> &str {
        &self.action.id
    }

    pub fn is_critical(&self, critical_types: &[ActionType]) -> bool {
        self.critical
            .unwrap_or_else(|| critical_types.contains(&self.action.action_type))
    }
}

/// What a verification step checks after the action phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum VerificationCheck {
    HealthScore { min: f64 },
    ComponentHealth { component: String, min: f64 },
    ErrorRate { max: f64 },
    ResponseTime { max_ms: f64 },
    ConditionResolved,
}

impl fmt::Display for VerificationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationCheck::HealthScore { min } => write!(f, "health score >= {}", min),
            VerificationCheck::ComponentHealth { component, min } => {
                write!(f, "{} health >= {}", component, min)
            }
            VerificationCheck::ErrorRate { max } => write!(f, "error rate <= {}", max),
            VerificationCheck::ResponseTime { max_ms } => {
                write!(f, "response time <= {}ms", max_ms)
            }
            VerificationCheck::ConditionResolved => write!(f, "condition resolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationStep {
    pub id: String,

    #[serde(flatten)]
    pub check: VerificationCheck,

    /// A failing critical step fails the session.
    #[serde(default)]
    pub critical: bool,
}

impl VerificationStep {
    pub fn new(id: impl Into<String>, check: VerificationCheck) -> Self {
        Self {
            id: id.into(),
            check,
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Targets compared between the before and after metric snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessCriteria {
    /// Minimum system health after the stability period.
    pub health_score: f64,

    /// Required relative drop in response time (0.1 = 10% faster).
    pub performance_improvement: f64,

    /// Required relative drop in error rate.
    pub error_rate_reduction: f64,

    /// Wait before the post-healing health probe.
    #[serde(rename = "stability_period_ms", with = "swarm_types::duration_ms")]
    pub stability_period: Duration,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            health_score: 0.8,
            performance_improvement: 0.0,
            error_rate_reduction: 0.0,
            stability_period: Duration::from_secs(5),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}

/// A multi-step healing procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingScenario {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub category: String,

    pub triggers: Vec<TriggerMatcher>,

    pub actions: Vec<HealingAction>,

    #[serde(default)]
    pub verifications: Vec<VerificationStep>,

    /// Best-effort compensation, run in order when the session fails.
    #[serde(default)]
    pub rollback: Vec<Action>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(
        rename = "cooldown_ms",
        with = "swarm_types::duration_ms",
        default = "default_cooldown"
    )]
    pub cooldown: Duration,

    #[serde(default)]
    pub success_criteria: SuccessCriteria,
}

impl HealingScenario {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        triggers: Vec<TriggerMatcher>,
        actions: Vec<HealingAction>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category: category.into(),
            triggers,
            actions,
            verifications: Vec::new(),
            rollback: Vec::new(),
            max_retries: default_max_retries(),
            cooldown: default_cooldown(),
            success_criteria: SuccessCriteria::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_verification(mut self, step: VerificationStep) -> Self {
        self.verifications.push(step);
        self
    }

    pub fn with_rollback(mut self, action: Action) -> Self {
        self.rollback.push(action);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_success_criteria(mut self, criteria: SuccessCriteria) -> Self {
        self.success_criteria = criteria;
        self
    }

    /// Highest severity any of the scenario's matchers is meant for.
    pub fn max_trigger_severity(&self) -> Severity {
        self.triggers
            .iter()
            .map(TriggerMatcher::severity)
            .max()
            .unwrap_or_default()
    }

    pub fn validate(&self) -> HealingResult<()> {
        let invalid = |reason: String| HealingError::InvalidScenario {
            scenario_id: self.id.clone(),
            reason,
        };

        if self.triggers.is_empty() {
            return Err(invalid("scenario has no trigger matchers".to_string()));
        }
        if self.actions.is_empty() {
            return Err(invalid("scenario has no actions".to_string()));
        }

        let mut seen = HashSet::new();
        for healing_action in &self.actions {
            for dependency in &healing_action.dependencies {
                if !seen.contains(dependency.as_str()) {
                    return Err(invalid(format!(
                        "action {} depends on {} which is not an earlier action",
                        healing_action.id(),
                        dependency
                    )));
                }
            }
            if !seen.insert(healing_action.id()) {
                return Err(invalid(format!("duplicate action id {}", healing_action.id())));
            }
        }

        let mut steps = HashSet::new();
        for step in &self.verifications {
            if !steps.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate verification id {}", step.id)));
            }
        }

        for matcher in &self.triggers {
            if let TriggerMatcher::Pattern { pattern, .. } = matcher {
                compile_pattern(&self.id, pattern)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn compile_pattern(scenario_id: &str, pattern: &str) -> HealingResult<Regex> {
    Regex::new(pattern).map_err(|e| HealingError::InvalidPattern {
        scenario_id: scenario_id.to_string(),
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restart() -> HealingAction {
        HealingAction::new(Action::new("restart", ActionType::Restart, "agent"))
    }

    fn scenario(actions: Vec<HealingAction>) -> HealingScenario {
        HealingScenario::new(
            "agent-restart",
            "agent",
            vec![TriggerMatcher::event("agent_timeout", Severity::Medium)],
            actions,
        )
    }

    #[test]
    fn test_dependency_must_be_earlier() {
        let verify = HealingAction::new(Action::new("verify", ActionType::Custom, "agent"))
            .depends_on("restart");

        assert!(scenario(vec![restart(), verify.clone()]).validate().is_ok());
        assert!(matches!(
            scenario(vec![verify, restart()]).validate(),
            Err(HealingError::InvalidScenario { .. })
        ));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut scenario = scenario(vec![restart()]);
        scenario
            .triggers
            .push(TriggerMatcher::pattern("(unclosed", MatchField::Message, Severity::High));
        assert!(matches!(
            scenario.validate(),
            Err(HealingError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_critical_defaults_to_action_type() {
        let critical = [ActionType::Restart];
        assert!(restart().is_critical(&critical));
        assert!(!restart().critical(false).is_critical(&critical));
        let scale = HealingAction::new(Action::new("scale", ActionType::Scale, "svc"));
        assert!(!scale.is_critical(&critical));
    }

    #[test]
    fn test_max_trigger_severity() {
        let mut scenario = scenario(vec![restart()]);
        scenario.triggers.push(TriggerMatcher::metric(
            "memory",
            ThresholdOperator::Gt,
            0.9,
            Severity::Critical,
        ));
        assert_eq!(scenario.max_trigger_severity(), Severity::Critical);
    }

    #[test]
    fn test_scenario_from_toml() {
        let scenario: HealingScenario = toml::from_str(
            r#"
            id = "memory-pressure"
            category = "resource"
            cooldown_ms = 60000

            [[triggers]]
            kind = "metric_threshold"
            metric = "memory"
            operator = "gt"
            threshold = 0.85
            severity = "high"

            [[actions]]
            action = { id = "clear-cache", type = "mitigate", target = "cache" }

            [[actions]]
            action = { id = "restart", type = "restart", target = "worker" }
            dependencies = ["clear-cache"]

            [[verifications]]
            id = "health"
            check = "health_score"
            min = 0.7
            critical = true

            [success_criteria]
            stability_period_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(scenario.cooldown, Duration::from_secs(60));
        assert_eq!(scenario.actions[1].dependencies, vec!["clear-cache"]);
        assert_eq!(
            scenario.verifications[0].check,
            VerificationCheck::HealthScore { min: 0.7 }
        );
        assert_eq!(
            scenario.success_criteria.stability_period,
            Duration::from_secs(1)
        );
        assert!(scenario.validate().is_ok());
    }
}
