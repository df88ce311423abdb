//! Orchestration strategy selection.

use std::fmt;

use serde::{Deserialize, Serialize};
use swarm_types::{Severity, Trigger};

use crate::config::StrategyWeights;

/// How the coordinator sequences components for one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStrategy {
    /// detection, planning, recovery, verification; abort if detection fails.
    DetectionFirst,
    /// recovery at once, detection for learning, self_healing as fallback.
    RecoveryFirst,
    /// detection, recovery, resilience and monitoring concurrently.
    Parallel,
    /// detection decides which further components run.
    Adaptive,
}

impl OrchestrationStrategy {
    /// Candidates in tie-break order.
    pub const ALL: [OrchestrationStrategy; 4] = [
        OrchestrationStrategy::DetectionFirst,
        OrchestrationStrategy::RecoveryFirst,
        OrchestrationStrategy::Parallel,
        OrchestrationStrategy::Adaptive,
    ];
}

impl fmt::Display for OrchestrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestrationStrategy::DetectionFirst => "detection_first",
            OrchestrationStrategy::RecoveryFirst => "recovery_first",
            OrchestrationStrategy::Parallel => "parallel",
            OrchestrationStrategy::Adaptive => "adaptive",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyScore {
    pub strategy: OrchestrationStrategy,
    pub score: f64,
}

/// The chosen strategy, the runner-ups and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub strategy: OrchestrationStrategy,
    pub score: f64,
    /// Decision confidence (0.0-1.0), compared under the consensus policy.
    pub confidence: f64,
    /// Runner-ups, best first.
    pub alternatives: Vec<StrategyScore>,
    pub rationale: String,
}

/// Inputs besides the trigger.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput {
    /// Orchestrations active before this one.
    pub active: usize,
    pub limit: usize,
    pub decision_threshold: f64,
}

/// Score every strategy for `trigger` and keep the best.
pub fn select_strategy(
    trigger: &Trigger,
    input: SelectionInput,
    weights: &StrategyWeights,
) -> StrategyDecision {
    let free_share = if input.limit == 0 {
        0.0
    } else {
        1.0 - (input.active as f64 / input.limit as f64).min(1.0)
    };

    let mut scored: Vec<(StrategyScore, Vec<String>)> = OrchestrationStrategy::ALL
        .iter()
        .map(|&strategy| {
            let mut score = weights.base;
            let mut reasons = Vec::new();
            match strategy {
                OrchestrationStrategy::DetectionFirst => {
                    if trigger.predictive {
                        score += weights.predictive;
                        reasons.push("predictive trigger".to_string());
                    }
                    if trigger.severity == Severity::Low {
                        score += weights.low_severity;
                        reasons.push("low severity".to_string());
                    }
                }
                OrchestrationStrategy::RecoveryFirst => {
                    if trigger.severity.is_urgent() {
                        score += weights.urgency;
                        reasons.push(format!("{} severity needs immediate recovery", trigger.severity));
                    }
                }
                OrchestrationStrategy::Parallel => {
                    if free_share > 0.0 {
                        score += weights.concurrency * free_share;
                        reasons.push(format!(
                            "{:.0}% of orchestration slots free",
                            free_share * 100.0
                        ));
                    }
                }
                OrchestrationStrategy::Adaptive => {
                    score += weights.confidence * trigger.confidence;
                    reasons.push(format!("trigger confidence {:.2}", trigger.confidence));
                }
            }
            (StrategyScore { strategy, score }, reasons)
        })
        .collect();

    // stable sort keeps declaration order on ties
    scored.sort_by(|(a, _), (b, _)| b.score.total_cmp(&a.score));

    let (best, reasons) = scored.remove(0);
    let mut alternatives: Vec<StrategyScore> = scored.into_iter().map(|(s, _)| s).collect();

    if best.score < input.decision_threshold {
        let rationale = format!(
            "best score {:.2} ({}) below decision threshold {:.2}, falling back to adaptive",
            best.score, best.strategy, input.decision_threshold
        );
        let adaptive = if best.strategy == OrchestrationStrategy::Adaptive {
            best
        } else {
            let index = alternatives
                .iter()
                .position(|s| s.strategy == OrchestrationStrategy::Adaptive)
                .unwrap_or(0);
            let adaptive = alternatives.remove(index);
            alternatives.insert(0, best);
            adaptive
        };
        return StrategyDecision {
            strategy: OrchestrationStrategy::Adaptive,
            score: adaptive.score,
            confidence: adaptive.score.clamp(0.0, 1.0),
            alternatives,
            rationale,
        };
    }

    let rationale = if reasons.is_empty() {
        format!("{} scored {:.2} on base weight", best.strategy, best.score)
    } else {
        format!("{} scored {:.2}: {}", best.strategy, best.score, reasons.join(", "))
    };
    StrategyDecision {
        strategy: best.strategy,
        score: best.score,
        confidence: best.score.clamp(0.0, 1.0),
        alternatives,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(active: usize) -> SelectionInput {
        SelectionInput {
            active,
            limit: 10,
            decision_threshold: 0.6,
        }
    }

    #[test]
    fn test_urgent_trigger_prefers_recovery_first() {
        let trigger = Trigger::new("db_down", Severity::Critical, "database");
        let decision = select_strategy(&trigger, input(0), &StrategyWeights::default());
        assert_eq!(decision.strategy, OrchestrationStrategy::RecoveryFirst);
        assert_eq!(decision.alternatives.len(), 3);
        assert!(decision.rationale.contains("critical"));
    }

    #[test]
    fn test_predictive_low_severity_prefers_detection_first() {
        let trigger = Trigger::new("disk_trend", Severity::Low, "resource").predictive();
        let decision = select_strategy(&trigger, input(0), &StrategyWeights::default());
        assert_eq!(decision.strategy, OrchestrationStrategy::DetectionFirst);
        assert!((decision.score - 1.1).abs() < 1e-9);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_uncertain_trigger_with_free_slots_runs_parallel() {
        let trigger = Trigger::new("flaky", Severity::Medium, "service").with_confidence(0.4);
        let decision = select_strategy(&trigger, input(0), &StrategyWeights::default());
        assert_eq!(decision.strategy, OrchestrationStrategy::Parallel);
    }

    #[test]
    fn test_below_threshold_falls_back_to_adaptive() {
        let trigger = Trigger::new("flaky", Severity::Medium, "service").with_confidence(0.2);
        let decision = select_strategy(&trigger, input(10), &StrategyWeights::default());
        assert_eq!(decision.strategy, OrchestrationStrategy::Adaptive);
        assert!(decision.rationale.contains("below decision threshold"));
        assert_eq!(decision.alternatives.len(), 3);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let trigger = Trigger::new("agent_timeout", Severity::Medium, "agent");
        let a = select_strategy(&trigger, input(3), &StrategyWeights::default());
        let b = select_strategy(&trigger, input(3), &StrategyWeights::default());
        assert_eq!(a, b);
    }
}
