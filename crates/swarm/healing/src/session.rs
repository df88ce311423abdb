//! Healing session records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_types::{ActionType, CompletionRecord, EntityKind, SessionId, SystemMetrics, Trigger};

use crate::scenario::SuccessCriteria;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Running,
    Verifying,
    Completed,
    Failed,
    RolledBack,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::RolledBack
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::Running => "running",
            SessionStatus::Verifying => "verifying",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionExecutionStatus {
    Pending,
    Completed,
    Failed,
    /// Not run: a dependency did not complete or the phase was aborted.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub action_id: String,
    pub action_type: ActionType,
    pub target: String,
    pub critical: bool,
    pub status: ActionExecutionStatus,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub step_id: String,
    pub critical: bool,
    pub passed: bool,
    pub observed: Option<f64>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackExecution {
    pub action_id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Health probe after the stability period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityCheck {
    pub waited_ms: u64,
    pub health: f64,
    pub stable: bool,
}

/// Before and after snapshots with relative improvements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingMetrics {
    pub before: SystemMetrics,
    pub after: Option<SystemMetrics>,
    pub health_improvement: f64,
    /// Relative response time drop (positive is faster).
    pub performance_improvement: f64,
    /// Relative error rate drop (positive is fewer errors).
    pub error_rate_reduction: f64,
}

impl HealingMetrics {
    pub fn new(before: SystemMetrics, after: Option<SystemMetrics>) -> Self {
        let (health, performance, errors) = match &after {
            Some(after) => (
                after.health_score - before.health_score,
                relative_drop(before.response_time_ms, after.response_time_ms),
                relative_drop(before.error_rate, after.error_rate),
            ),
            None => (0.0, 0.0, 0.0),
        };
        Self {
            before,
            after,
            health_improvement: health,
            performance_improvement: performance,
            error_rate_reduction: errors,
        }
    }
}

fn relative_drop(before: f64, after: f64) -> f64 {
    if before <= 0.0 {
        0.0
    } else {
        (before - after) / before
    }
}

/// Which success criteria the after-snapshot met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaEvaluation {
    pub health_score_met: bool,
    pub performance_met: bool,
    pub error_rate_met: bool,
}

impl CriteriaEvaluation {
    pub fn evaluate(criteria: &SuccessCriteria, metrics: &HealingMetrics) -> Self {
        let health = metrics
            .after
            .as_ref()
            .map(|m| m.health_score)
            .unwrap_or(metrics.before.health_score);
        Self {
            health_score_met: health >= criteria.health_score,
            performance_met: metrics.performance_improvement >= criteria.performance_improvement,
            error_rate_met: metrics.error_rate_reduction >= criteria.error_rate_reduction,
        }
    }

    pub fn all_met(&self) -> bool {
        self.health_score_met && self.performance_met && self.error_rate_met
    }
}

/// Aggregated result of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingOutcome {
    pub success: bool,
    /// Success with enough verification steps passing.
    pub healed: bool,
    pub action_success_ratio: f64,
    pub verification_pass_ratio: f64,
    pub aborted: Option<String>,
    pub stability: Option<StabilityCheck>,
    pub criteria: Option<CriteriaEvaluation>,
    pub rollback: Vec<RollbackExecution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingSession {
    pub id: SessionId,
    pub scenario_id: String,
    pub trigger: Trigger,
    pub status: SessionStatus,
    pub match_score: f64,
    pub selection_score: f64,
    pub actions: Vec<ActionExecution>,
    pub verifications: Vec<VerificationResult>,
    pub outcome: Option<HealingOutcome>,
    pub metrics: Option<HealingMetrics>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub reason: Option<String>,
    pub recommendations: Vec<String>,
}

impl HealingSession {
    pub fn new(scenario_id: &str, trigger: Trigger, match_score: f64, selection_score: f64) -> Self {
        Self {
            id: SessionId::generate(),
            scenario_id: scenario_id.to_string(),
            trigger,
            status: SessionStatus::Initiated,
            match_score,
            selection_score,
            actions: Vec::new(),
            verifications: Vec::new(),
            outcome: None,
            metrics: None,
            created_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            reason: None,
            recommendations: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn success(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }

    pub fn healed(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.healed)
    }

    pub fn completion_record(&self) -> CompletionRecord {
        let mut component_success: BTreeMap<String, bool> = self
            .actions
            .iter()
            .filter(|a| a.status != ActionExecutionStatus::Skipped)
            .map(|a| (a.action_id.clone(), a.status == ActionExecutionStatus::Completed))
            .collect();
        for step in &self.verifications {
            component_success.insert(format!("verify:{}", step.step_id), step.passed);
        }

        CompletionRecord {
            entity: EntityKind::HealingSession,
            id: self.id.to_string(),
            trigger_id: self.trigger.id.as_str().to_string(),
            status: self.status.to_string(),
            duration_ms: self.duration_ms.unwrap_or(0),
            success: self.success(),
            confidence: self.match_score,
            component_success,
            reason: self.reason.clone(),
            recommendations: self.recommendations.clone(),
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_improvements_are_relative() {
        let before = SystemMetrics {
            response_time_ms: 400.0,
            error_rate: 0.2,
            health_score: 0.5,
            ..SystemMetrics::default()
        };
        let after = SystemMetrics {
            response_time_ms: 300.0,
            error_rate: 0.05,
            health_score: 0.9,
            ..SystemMetrics::default()
        };
        let metrics = HealingMetrics::new(before, Some(after));

        assert_eq!(metrics.performance_improvement, 0.25);
        assert!((metrics.error_rate_reduction - 0.75).abs() < 1e-9);

        let criteria = SuccessCriteria {
            performance_improvement: 0.3,
            ..SuccessCriteria::default()
        };
        let evaluation = CriteriaEvaluation::evaluate(&criteria, &metrics);
        assert!(evaluation.health_score_met);
        assert!(!evaluation.performance_met);
        assert!(!evaluation.all_met());
    }
}
