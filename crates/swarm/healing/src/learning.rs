//! Per-scenario outcome history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Rate reported for a scenario that never ran.
pub const DEFAULT_SCENARIO_SUCCESS_RATE: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub attempts: u64,
    pub successes: u64,
    pub consecutive_failures: u32,
    pub last_run: Option<DateTime<Utc>>,
}

impl ScenarioStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            DEFAULT_SCENARIO_SUCCESS_RATE
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    pub fn in_cooldown(&self, cooldown: Duration, now: DateTime<Utc>) -> bool {
        let cooldown = chrono::Duration::from_std(cooldown).unwrap_or_default();
        self.last_run.is_some_and(|last| now - last < cooldown)
    }
}

#[derive(Default)]
pub struct ScenarioLearning {
    stats: DashMap<String, ScenarioStats>,
}

impl ScenarioLearning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, scenario_id: &str, success: bool, at: DateTime<Utc>) -> ScenarioStats {
        let mut entry = self.stats.entry(scenario_id.to_string()).or_default();
        entry.attempts += 1;
        entry.last_run = Some(at);
        if success {
            entry.successes += 1;
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
        }
        *entry
    }

    pub fn stats(&self, scenario_id: &str) -> ScenarioStats {
        self.stats
            .get(scenario_id)
            .map(|s| *s)
            .unwrap_or_default()
    }

    pub fn success_rate(&self, scenario_id: &str) -> f64 {
        self.stats(scenario_id).success_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_scenario_is_trusted() {
        let learning = ScenarioLearning::new();
        assert_eq!(learning.success_rate("memory-pressure"), 1.0);
        assert!(!learning
            .stats("memory-pressure")
            .in_cooldown(Duration::from_secs(60), Utc::now()));
    }

    #[test]
    fn test_consecutive_failures_reset_on_success() {
        let learning = ScenarioLearning::new();
        let now = Utc::now();
        learning.record("s", false, now);
        let stats = learning.record("s", false, now);
        assert_eq!(stats.consecutive_failures, 2);
        assert_eq!(stats.success_rate(), 0.0);

        let stats = learning.record("s", true, now);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.in_cooldown(Duration::from_secs(60), now));
    }
}
