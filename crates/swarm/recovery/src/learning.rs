//! Per-strategy success tracking.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Rate reported for a strategy that never ran.
pub const DEFAULT_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub attempts: u64,
    pub successes: u64,
}

impl StrategyStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            DEFAULT_SUCCESS_RATE
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Historical success rate per strategy.
#[derive(Default)]
pub struct LearningEngine {
    stats: DashMap<String, StrategyStats>,
}

impl LearningEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, strategy_id: &str, success: bool) -> StrategyStats {
        let mut entry = self.stats.entry(strategy_id.to_string()).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
        *entry
    }

    pub fn stats(&self, strategy_id: &str) -> StrategyStats {
        self.stats
            .get(strategy_id)
            .map(|s| *s)
            .unwrap_or_default()
    }

    pub fn success_rate(&self, strategy_id: &str) -> f64 {
        self.stats(strategy_id).success_rate()
    }

    pub fn success_rates(&self) -> BTreeMap<String, f64> {
        self.stats
            .iter()
            .map(|s| (s.key().clone(), s.value().success_rate()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_for_unused_strategy() {
        let learning = LearningEngine::new();
        assert_eq!(learning.success_rate("standard"), 0.5);
    }

    #[test]
    fn test_rate_is_successes_over_attempts() {
        let learning = LearningEngine::new();
        learning.record("standard", true);
        learning.record("standard", false);
        learning.record("standard", true);
        learning.record("standard", true);

        assert_eq!(learning.success_rate("standard"), 0.75);
        assert_eq!(learning.stats("standard").attempts, 4);
    }
}
