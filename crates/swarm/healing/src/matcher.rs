//! Scenario matching and selection scoring.
//!
//! A scenario's match score is the mean of its non-zero matcher scores,
//! scaled by `0.5 + 0.5 * success_rate`. Qualifying scenarios are then
//! ranked by [`selection_score`].

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use swarm_types::{SystemMetrics, Trigger};

use crate::config::SelectionWeights;
use crate::error::HealingResult;
use crate::scenario::{compile_pattern, HealingScenario, MatchField, TriggerMatcher};

/// What a scenario is matched against.
pub struct MatchInput<'a> {
    pub trigger: &'a Trigger,
    pub system: &'a SystemMetrics,
    pub now: DateTime<Utc>,
}

enum Compiled {
    Pattern(Regex),
    Plain,
}

/// A scenario with its patterns compiled once at registration.
pub struct CompiledScenario {
    scenario: HealingScenario,
    compiled: Vec<Compiled>,
}

impl CompiledScenario {
    pub fn compile(scenario: HealingScenario) -> HealingResult<Arc<Self>> {
        scenario.validate()?;
        let compiled = scenario
            .triggers
            .iter()
            .map(|matcher| match matcher {
                TriggerMatcher::Pattern { pattern, .. } => {
                    compile_pattern(&scenario.id, pattern).map(Compiled::Pattern)
                }
                _ => Ok(Compiled::Plain),
            })
            .collect::<HealingResult<Vec<_>>>()?;

        Ok(Arc::new(Self { scenario, compiled }))
    }

    pub fn scenario(&self) -> &HealingScenario {
        &self.scenario
    }

    pub fn id(&self) -> &str {
        &self.scenario.id
    }

    /// Mean of the non-zero matcher scores, before history weighting.
    pub fn raw_score(&self, input: &MatchInput<'_>) -> f64 {
        let scores: Vec<f64> = self
            .scenario
            .triggers
            .iter()
            .zip(&self.compiled)
            .map(|(matcher, compiled)| matcher_score(matcher, compiled, input))
            .filter(|s| *s > 0.0)
            .collect();

        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    /// Raw score weighted by the scenario's historical success rate.
    pub fn match_score(&self, input: &MatchInput<'_>, success_rate: f64) -> f64 {
        self.raw_score(input) * (0.5 + 0.5 * success_rate)
    }
}

fn matcher_score(matcher: &TriggerMatcher, compiled: &Compiled, input: &MatchInput<'_>) -> f64 {
    let trigger = input.trigger;
    match (matcher, compiled) {
        (TriggerMatcher::Pattern { field, .. }, Compiled::Pattern(regex)) => {
            let text = match field {
                MatchField::Message => trigger.message.as_str(),
                MatchField::Type => trigger.trigger_type.as_str(),
                MatchField::Category => trigger.category.as_str(),
                MatchField::Source => trigger.source.as_str(),
            };
            hit(regex.is_match(text))
        }
        (
            TriggerMatcher::MetricThreshold {
                metric,
                operator,
                threshold,
                ..
            },
            _,
        ) => metric_value(metric, input)
            .map(|value| hit(operator.holds(value, *threshold)))
            .unwrap_or(0.0),
        (
            TriggerMatcher::EventPattern {
                trigger_type,
                category,
                source,
                context,
                ..
            },
            _,
        ) => {
            let mut checked = 0usize;
            let mut matched = 0usize;
            let mut check = |ok: bool| {
                checked += 1;
                if ok {
                    matched += 1;
                }
            };
            if let Some(t) = trigger_type {
                check(t == &trigger.trigger_type);
            }
            if let Some(c) = category {
                check(c == &trigger.category);
            }
            if let Some(s) = source {
                check(s == &trigger.source);
            }
            for (key, expected) in context {
                check(trigger.context.get(key) == Some(expected));
            }
            if checked == 0 {
                0.0
            } else {
                matched as f64 / checked as f64
            }
        }
        (TriggerMatcher::TimeBased { hours, weekdays, .. }, _) => {
            let hour_ok = hours.is_empty() || hours.contains(&input.now.hour());
            let day_ok = weekdays.is_empty()
                || weekdays.contains(&input.now.weekday().number_from_monday());
            hit(hour_ok && day_ok)
        }
        (TriggerMatcher::Pattern { .. }, Compiled::Plain) => 0.0,
    }
}

fn hit(matched: bool) -> f64 {
    if matched {
        1.0
    } else {
        0.0
    }
}

fn metric_value(metric: &str, input: &MatchInput<'_>) -> Option<f64> {
    let system = input.system;
    match metric {
        "cpu" => Some(system.cpu),
        "memory" => Some(system.memory),
        "network" => Some(system.network),
        "health_score" => Some(system.health_score),
        "error_rate" => Some(system.error_rate),
        "response_time_ms" => Some(system.response_time_ms),
        other => input.trigger.context_f64(other),
    }
}

/// A qualifying scenario and how it ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMatch {
    pub scenario_id: String,
    pub match_score: f64,
    pub selection_score: f64,
}

/// Rank score among qualifying scenarios.
pub fn selection_score(
    scenario: &HealingScenario,
    trigger: &Trigger,
    success_rate: f64,
    in_cooldown: bool,
    weights: &SelectionWeights,
) -> f64 {
    let mut score = 0.0;
    if scenario.category == trigger.category {
        score += weights.category_match;
    }

    let gap = scenario.max_trigger_severity().gap(trigger.severity) as f64;
    score += (weights.severity_fit - weights.severity_step * gap).max(0.0);

    score += weights.history_bonus * success_rate;
    if !in_cooldown {
        score += weights.cooldown_bonus;
    }
    score += (weights.simplicity - scenario.actions.len() as f64).max(0.0);
    score
}
