//! Built-in strategy catalog, used when configuration provides none.

use std::time::Duration;

use serde_json::json;
use swarm_types::{Action, ActionType, Severity};

pub use swarm_types::SOURCE_TARGET;

use crate::strategy::{MatchCondition, RecoveryStrategy, StrategyType};

pub fn default_strategies() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::new(
            "standard-restart",
            StrategyType::Standard,
            MatchCondition::any().severities([Severity::Low, Severity::Medium, Severity::High]),
            vec![Action::new("restart", ActionType::Restart, SOURCE_TARGET)
                .with_timeout(Duration::from_secs(30))
                .with_rollback(Action::new(
                    "restore-previous",
                    ActionType::Rollback,
                    SOURCE_TARGET,
                ))],
        )
        .with_name("Restart the failing component"),
        RecoveryStrategy::new(
            "aggressive-failover",
            StrategyType::Aggressive,
            MatchCondition::any().severities([Severity::High, Severity::Critical]),
            vec![
                Action::new("failover", ActionType::Failover, SOURCE_TARGET)
                    .with_timeout(Duration::from_secs(20)),
                Action::new("scale-out", ActionType::Scale, SOURCE_TARGET)
                    .with_parameter("replicas_delta", json!(2))
                    .with_prerequisite("failover")
                    .with_timeout(Duration::from_secs(60)),
            ],
        )
        .with_name("Fail over and add capacity")
        .with_cooldown(Duration::from_secs(120)),
        RecoveryStrategy::new(
            "conservative-retry",
            StrategyType::Conservative,
            MatchCondition::any().severities([Severity::Low, Severity::Medium]),
            vec![Action::new("retry", ActionType::Retry, SOURCE_TARGET)
                .with_parameter("backoff_ms", json!(1000))
                .with_timeout(Duration::from_secs(15))],
        )
        .with_name("Retry with backoff")
        .with_cooldown(Duration::from_secs(30))
        .with_max_retries(5),
        RecoveryStrategy::new(
            "emergency-mitigate",
            StrategyType::Emergency,
            MatchCondition::any().severities([Severity::Critical]),
            vec![
                Action::new("shed-load", ActionType::Mitigate, SOURCE_TARGET)
                    .with_parameter("mode", json!("shed_load"))
                    .with_timeout(Duration::from_secs(10)),
                Action::new("failover", ActionType::Failover, SOURCE_TARGET)
                    .with_prerequisite("shed-load")
                    .with_timeout(Duration::from_secs(20)),
                Action::new("restart", ActionType::Restart, SOURCE_TARGET)
                    .with_prerequisite("failover")
                    .with_timeout(Duration::from_secs(30)),
            ],
        )
        .with_name("Shed load, fail over, restart")
        .with_priority(10)
        .with_cooldown(Duration::from_secs(300))
        .with_max_retries(1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let strategies = default_strategies();
        assert_eq!(strategies.len(), 4);
        for strategy in &strategies {
            strategy.validate(3).unwrap();
        }
    }
}
