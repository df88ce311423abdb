//! Built-in scenario catalog, used when configuration provides none.

use std::time::Duration;

use serde_json::json;
use swarm_types::{Action, ActionType, Severity, SOURCE_TARGET};

use crate::scenario::{
    HealingAction, HealingScenario, MatchField, SuccessCriteria, ThresholdOperator,
    TriggerMatcher, VerificationCheck, VerificationStep,
};

pub fn default_scenarios() -> Vec<HealingScenario> {
    vec![agent_unresponsive(), memory_pressure(), error_rate_spike()]
}

fn agent_unresponsive() -> HealingScenario {
    HealingScenario::new(
        "agent-unresponsive",
        "agent",
        vec![
            TriggerMatcher::event("agent_timeout", Severity::Medium),
            TriggerMatcher::pattern(
                r"(?i)(timeout|unresponsive|heartbeat)",
                MatchField::Message,
                Severity::High,
            ),
        ],
        vec![
            HealingAction::new(
                Action::new("restart-agent", ActionType::Restart, SOURCE_TARGET)
                    .with_timeout(Duration::from_secs(30)),
            ),
            HealingAction::new(
                Action::new("re-register", ActionType::Custom, SOURCE_TARGET)
                    .with_parameter("operation", json!("register")),
            )
            .depends_on("restart-agent"),
        ],
    )
    .with_name("Restart an unresponsive agent")
    .with_verification(
        VerificationStep::new(
            "agent-health",
            VerificationCheck::ComponentHealth {
                component: SOURCE_TARGET.to_string(),
                min: 0.7,
            },
        )
        .critical(),
    )
    .with_verification(VerificationStep::new(
        "resolved",
        VerificationCheck::ConditionResolved,
    ))
    .with_rollback(Action::new(
        "restore-agent-snapshot",
        ActionType::Rollback,
        SOURCE_TARGET,
    ))
    .with_cooldown(Duration::from_secs(120))
}

fn memory_pressure() -> HealingScenario {
    HealingScenario::new(
        "memory-pressure",
        "resource",
        vec![
            TriggerMatcher::metric("memory", ThresholdOperator::Gt, 0.85, Severity::High),
            TriggerMatcher::pattern(
                r"(?i)(out of memory|oom|memory)",
                MatchField::Message,
                Severity::High,
            ),
        ],
        vec![
            HealingAction::new(
                Action::new("clear-cache", ActionType::Mitigate, SOURCE_TARGET)
                    .with_parameter("mode", json!("clear_cache")),
            ),
            HealingAction::new(
                Action::new("scale-out", ActionType::Scale, SOURCE_TARGET)
                    .with_parameter("replicas_delta", json!(1))
                    .with_timeout(Duration::from_secs(60)),
            ),
            HealingAction::new(Action::new("restart-workers", ActionType::Restart, SOURCE_TARGET))
                .depends_on("scale-out"),
        ],
    )
    .with_name("Relieve memory pressure")
    .with_verification(
        VerificationStep::new("health", VerificationCheck::HealthScore { min: 0.7 }).critical(),
    )
    .with_verification(VerificationStep::new(
        "latency",
        VerificationCheck::ResponseTime { max_ms: 1000.0 },
    ))
    .with_rollback(
        Action::new("scale-in", ActionType::Scale, SOURCE_TARGET)
            .with_parameter("replicas_delta", json!(-1)),
    )
    .with_success_criteria(SuccessCriteria {
        health_score: 0.7,
        stability_period: Duration::from_secs(10),
        ..SuccessCriteria::default()
    })
}

fn error_rate_spike() -> HealingScenario {
    HealingScenario::new(
        "error-rate-spike",
        "service",
        vec![
            TriggerMatcher::metric("error_rate", ThresholdOperator::Gt, 0.1, Severity::High),
            TriggerMatcher::event("error_rate_spike", Severity::High),
        ],
        vec![
            HealingAction::new(
                Action::new("isolate-dependency", ActionType::Mitigate, SOURCE_TARGET)
                    .with_parameter("mode", json!("open_circuit")),
            ),
            HealingAction::new(Action::new(
                "rollback-deploy",
                ActionType::Rollback,
                SOURCE_TARGET,
            ))
            .depends_on("isolate-dependency"),
            HealingAction::new(
                Action::new("retry-failed", ActionType::Retry, SOURCE_TARGET)
                    .with_parameter("backoff_ms", json!(500)),
            ),
        ],
    )
    .with_name("Contain an error rate spike")
    .with_verification(
        VerificationStep::new("error-rate", VerificationCheck::ErrorRate { max: 0.05 }).critical(),
    )
    .with_verification(VerificationStep::new(
        "resolved",
        VerificationCheck::ConditionResolved,
    ))
    .with_rollback(
        Action::new("close-circuit", ActionType::Mitigate, SOURCE_TARGET)
            .with_parameter("mode", json!("close_circuit")),
    )
    .with_success_criteria(SuccessCriteria {
        error_rate_reduction: 0.5,
        ..SuccessCriteria::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let scenarios = default_scenarios();
        assert_eq!(scenarios.len(), 3);
        for scenario in &scenarios {
            scenario.validate().unwrap();
        }
    }
}
