//! Strategy scoring.
//!
//! [`score_strategy`] is a pure function of strategy, context, historical
//! success rate and scoring constants.

use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::context::RecoveryContext;
use crate::strategy::{RecoveryStrategy, StrategyType};

/// Score of one strategy with its parts, kept for decision rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub strategy_id: String,
    pub matched: bool,
    pub base: f64,
    pub severity: f64,
    pub history: f64,
    pub load: f64,
    pub timing: f64,
    pub confidence_factor: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    fn unmatched(strategy_id: &str) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            matched: false,
            base: 0.0,
            severity: 0.0,
            history: 0.0,
            load: 0.0,
            timing: 0.0,
            confidence_factor: 0.0,
            total: 0.0,
        }
    }
}

pub fn score_strategy(
    strategy: &RecoveryStrategy,
    context: &RecoveryContext,
    success_rate: f64,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    if !strategy.matches(&context.trigger) {
        return ScoreBreakdown::unmatched(&strategy.id);
    }

    let severity = config
        .severity_table
        .points(strategy.strategy_type, context.trigger.severity);
    let history = success_rate * config.history_weight;
    let load = load_adjustment(strategy.strategy_type, context, config);
    let timing = timing_adjustment(strategy.strategy_type, context, config);

    let recent = context.recent_failures(&strategy.id, config.recent_failure_window);
    let mut confidence_factor = config.recent_failure_decay.powi(recent as i32);
    if context.in_cooldown(&strategy.id, strategy.cooldown) {
        confidence_factor *= config.cooldown_factor;
    }
    let confidence_factor = confidence_factor.max(config.min_confidence_factor);

    let raw = config.base_score + severity + history + load + timing;
    let total = (raw * confidence_factor).clamp(0.0, config.max_score);

    ScoreBreakdown {
        strategy_id: strategy.id.clone(),
        matched: true,
        base: config.base_score,
        severity,
        history,
        load,
        timing,
        confidence_factor,
        total,
    }
}

fn load_adjustment(
    strategy_type: StrategyType,
    context: &RecoveryContext,
    config: &ScoringConfig,
) -> f64 {
    let peak = context.system.cpu.max(context.system.memory);
    match strategy_type {
        StrategyType::Aggressive | StrategyType::Emergency if peak > config.high_load_threshold => {
            -config.high_load_penalty
        }
        StrategyType::Conservative if peak > config.elevated_load_threshold => {
            config.conservative_load_bonus
        }
        _ => 0.0,
    }
}

fn timing_adjustment(
    strategy_type: StrategyType,
    context: &RecoveryContext,
    config: &ScoringConfig,
) -> f64 {
    let constraints = &context.time_constraints;
    match strategy_type {
        StrategyType::Emergency
            if constraints
                .max_downtime
                .is_some_and(|d| d < config.emergency_downtime_limit) =>
        {
            config.emergency_downtime_bonus
        }
        StrategyType::Conservative if constraints.business_hours => config.business_hours_bonus,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PriorAttempt;
    use crate::strategy::MatchCondition;
    use chrono::{DateTime, TimeZone, Utc};
    use swarm_types::{Action, ActionType, Severity, SystemMetrics, Trigger};

    fn night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 2, 0, 0).unwrap()
    }

    fn strategy(strategy_type: StrategyType) -> RecoveryStrategy {
        RecoveryStrategy::new(
            format!("{}-restart", strategy_type),
            strategy_type,
            MatchCondition::any().error_types(["agent_timeout"]),
            vec![Action::new("restart", ActionType::Restart, "agent")],
        )
    }

    fn context(severity: Severity, system: SystemMetrics) -> RecoveryContext {
        RecoveryContext::new(
            Trigger::new("agent_timeout", severity, "agent"),
            system,
            vec![],
            night(),
        )
    }

    #[test]
    fn test_standard_medium_score() {
        let score = score_strategy(
            &strategy(StrategyType::Standard),
            &context(Severity::Medium, SystemMetrics::default()),
            0.5,
            &ScoringConfig::default(),
        );
        assert_eq!(score.total, 80.0);
        assert_eq!(score.confidence_factor, 1.0);
    }

    #[test]
    fn test_deterministic() {
        let strategy = strategy(StrategyType::Aggressive);
        let context = context(Severity::High, SystemMetrics::default());
        let config = ScoringConfig::default();
        assert_eq!(
            score_strategy(&strategy, &context, 0.7, &config),
            score_strategy(&strategy, &context, 0.7, &config)
        );
    }

    #[test]
    fn test_non_matching_scores_zero() {
        let mut context = context(Severity::Medium, SystemMetrics::default());
        context.trigger.trigger_type = "disk_full".to_string();
        let score = score_strategy(
            &strategy(StrategyType::Standard),
            &context,
            1.0,
            &ScoringConfig::default(),
        );
        assert!(!score.matched);
        assert_eq!(score.total, 0.0);
    }

    #[test]
    fn test_load_adjustments() {
        let loaded = SystemMetrics {
            cpu: 0.85,
            ..SystemMetrics::default()
        };
        let config = ScoringConfig::default();

        let aggressive = score_strategy(
            &strategy(StrategyType::Aggressive),
            &context(Severity::High, loaded.clone()),
            0.5,
            &config,
        );
        assert_eq!(aggressive.load, -10.0);

        let conservative = score_strategy(
            &strategy(StrategyType::Conservative),
            &context(Severity::High, loaded),
            0.5,
            &config,
        );
        assert_eq!(conservative.load, 10.0);
    }

    #[test]
    fn test_emergency_downtime_bonus() {
        let mut context = context(Severity::Critical, SystemMetrics::default());
        context.time_constraints.max_downtime = Some(std::time::Duration::from_secs(30));
        let score = score_strategy(
            &strategy(StrategyType::Emergency),
            &context,
            0.5,
            &ScoringConfig::default(),
        );
        assert_eq!(score.timing, 15.0);
        assert_eq!(score.total, 100.0);
    }

    #[test]
    fn test_recent_failures_and_cooldown_decay() {
        let strategy = strategy(StrategyType::Standard);
        let failed = |minutes: i64| PriorAttempt {
            strategy_id: strategy.id.clone(),
            trigger_id: "other".to_string(),
            success: false,
            at: night() - chrono::Duration::minutes(minutes),
        };
        let mut context = context(Severity::Medium, SystemMetrics::default());
        context.previous_attempts = vec![failed(2), failed(4)];

        let score = score_strategy(&strategy, &context, 0.5, &ScoringConfig::default());
        // both failures are recent, neither is inside the 60s cooldown
        assert_eq!(score.confidence_factor, 0.25);
        assert_eq!(score.total, 20.0);

        let strategy = strategy.with_cooldown(std::time::Duration::from_secs(600));
        let score = score_strategy(&strategy, &context, 0.5, &ScoringConfig::default());
        assert_eq!(score.confidence_factor, 0.1);
    }
}
