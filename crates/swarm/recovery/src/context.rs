//! Snapshot of the world a strategy is scored against.
//!
//! Everything time-dependent (business hours, cooldowns, recent failures) is
//! resolved against `captured_at` so scoring stays a pure function.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use swarm_types::{SystemMetrics, Trigger};

/// One earlier attempt, as remembered by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorAttempt {
    pub strategy_id: String,
    pub trigger_id: String,
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Time limits on the recovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeConstraints {
    /// Downtime the affected service can tolerate, from the trigger's
    /// `max_downtime_ms` context entry.
    #[serde(default, with = "swarm_types::duration_ms::option")]
    pub max_downtime: Option<Duration>,

    pub business_hours: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub trigger: Trigger,
    pub captured_at: DateTime<Utc>,
    pub system: SystemMetrics,
    pub previous_attempts: Vec<PriorAttempt>,
    pub time_constraints: TimeConstraints,
}

impl RecoveryContext {
    pub fn new(
        trigger: Trigger,
        system: SystemMetrics,
        previous_attempts: Vec<PriorAttempt>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let max_downtime = trigger
            .context_f64("max_downtime_ms")
            .filter(|ms| *ms >= 0.0)
            .map(|ms| Duration::from_millis(ms as u64));

        Self {
            time_constraints: TimeConstraints {
                max_downtime,
                business_hours: is_business_hours(captured_at),
            },
            trigger,
            captured_at,
            system,
            previous_attempts,
        }
    }

    /// Failures of `strategy_id` within `window` before the snapshot.
    pub fn recent_failures(&self, strategy_id: &str, window: Duration) -> usize {
        let since = self.captured_at - chrono::Duration::from_std(window).unwrap_or_default();
        self.previous_attempts
            .iter()
            .filter(|a| a.strategy_id == strategy_id && !a.success)
            .filter(|a| a.at > since && a.at <= self.captured_at)
            .count()
    }

    /// Whether `strategy_id` last ran less than `cooldown` ago.
    pub fn in_cooldown(&self, strategy_id: &str, cooldown: Duration) -> bool {
        let cooldown = chrono::Duration::from_std(cooldown).unwrap_or_default();
        self.previous_attempts
            .iter()
            .filter(|a| a.strategy_id == strategy_id && a.at <= self.captured_at)
            .map(|a| a.at)
            .max()
            .is_some_and(|last| self.captured_at - last < cooldown)
    }

    /// Failed attempts of `strategy_id` against this very trigger.
    pub fn failures_for_trigger(&self, strategy_id: &str) -> u32 {
        self.previous_attempts
            .iter()
            .filter(|a| {
                a.strategy_id == strategy_id
                    && a.trigger_id == self.trigger.id.as_str()
                    && !a.success
            })
            .count() as u32
    }
}

/// Monday to Friday, 09:00 to 17:00 UTC.
pub fn is_business_hours(at: DateTime<Utc>) -> bool {
    let weekday = !matches!(at.weekday(), Weekday::Sat | Weekday::Sun);
    weekday && (9..17).contains(&at.hour())
}
