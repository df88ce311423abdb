//! Self-healing engine.
//!
//! Picks the best qualifying scenario for a trigger, runs its actions in
//! declared order while honouring dependencies, verifies, waits out the
//! stability period and rolls back on failure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use swarm_types::{
    execute_with_timeout, ActionExecutor, ActionType, BoundedHistory, MetricsSource,
    MonitoringSink, SessionId, SystemMetrics, Trigger, SOURCE_TARGET,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::catalog::default_scenarios;
use crate::config::HealingConfig;
use crate::error::{HealingError, HealingResult};
use crate::learning::ScenarioLearning;
use crate::matcher::{selection_score, CompiledScenario, MatchInput, ScenarioMatch};
use crate::safety::HealingSafetyMonitor;
use crate::scenario::{HealingScenario, VerificationCheck};
use crate::session::{
    ActionExecution, ActionExecutionStatus, CriteriaEvaluation, HealingMetrics, HealingOutcome,
    HealingSession, RollbackExecution, SessionStatus, StabilityCheck, VerificationResult,
};

/// Failure reason of a session whose healing future was dropped mid-run.
pub const ABANDONED_REASON: &str = "execution abandoned before completion";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingEngineStats {
    pub active: usize,
    pub healed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rolled_back: u64,
    pub cancelled: u64,
    pub vetoed: u64,
    pub actions_skipped: u64,
    pub action_timeouts: u64,
    pub rollback_failures: u64,
}

#[derive(Default)]
struct Counters {
    healed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rolled_back: AtomicU64,
    cancelled: AtomicU64,
    vetoed: AtomicU64,
    actions_skipped: AtomicU64,
    action_timeouts: AtomicU64,
    rollback_failures: AtomicU64,
}

/// What the action and verification phases produced.
struct PhaseResults {
    actions: Vec<ActionExecution>,
    verifications: Vec<VerificationResult>,
    aborted: Option<String>,
    stability: Option<StabilityCheck>,
    after: Option<SystemMetrics>,
}

pub struct SelfHealingEngine {
    config: RwLock<HealingConfig>,
    scenarios: RwLock<Vec<Arc<CompiledScenario>>>,
    learning: ScenarioLearning,
    safety: HealingSafetyMonitor,
    executor: Arc<dyn ActionExecutor>,
    metrics: Arc<dyn MetricsSource>,
    sink: Arc<dyn MonitoringSink>,
    active: DashMap<SessionId, HealingSession>,
    completed: Mutex<BoundedHistory<HealingSession>>,
    admission: Mutex<()>,
    counters: Counters,
}

impl SelfHealingEngine {
    pub fn new(
        config: HealingConfig,
        executor: Arc<dyn ActionExecutor>,
        metrics: Arc<dyn MetricsSource>,
        sink: Arc<dyn MonitoringSink>,
    ) -> HealingResult<Self> {
        config.validate()?;
        let scenarios = compile_catalog(&config)?;

        Ok(Self {
            scenarios: RwLock::new(scenarios),
            learning: ScenarioLearning::new(),
            safety: HealingSafetyMonitor::new(config.safety.clone()),
            executor,
            metrics,
            sink,
            active: DashMap::new(),
            completed: Mutex::new(BoundedHistory::new(config.history_limit)),
            admission: Mutex::new(()),
            counters: Counters::default(),
            config: RwLock::new(config),
        })
    }

    // ── Catalog ──────────────────────────────────────────────────────

    /// Add a scenario, replacing any with the same id. Patterns are
    /// compiled here.
    pub fn register_scenario(&self, scenario: HealingScenario) -> HealingResult<()> {
        let compiled = CompiledScenario::compile(scenario)?;
        let id = compiled.id().to_string();

        let mut scenarios = self.scenarios.write();
        match scenarios.iter_mut().find(|s| s.id() == id) {
            Some(existing) => *existing = compiled,
            None => scenarios.push(compiled),
        }
        info!(scenario_id = %id, "Healing scenario registered");
        Ok(())
    }

    pub fn remove_scenario(&self, scenario_id: &str) -> bool {
        let mut scenarios = self.scenarios.write();
        let before = scenarios.len();
        scenarios.retain(|s| s.id() != scenario_id);
        scenarios.len() != before
    }

    pub fn scenarios(&self) -> Vec<HealingScenario> {
        self.scenarios
            .read()
            .iter()
            .map(|s| s.scenario().clone())
            .collect()
    }

    pub fn safety(&self) -> &HealingSafetyMonitor {
        &self.safety
    }

    /// Apply new configuration. A non-empty scenario list replaces the
    /// catalog.
    pub fn apply_config(&self, config: HealingConfig) -> HealingResult<()> {
        config.validate()?;
        if !config.scenarios.is_empty() {
            *self.scenarios.write() = compile_catalog(&config)?;
        }
        self.safety.update_config(config.safety.clone());
        self.completed.lock().set_capacity(config.history_limit);
        *self.config.write() = config;
        info!("Healing configuration applied");
        Ok(())
    }

    // ── Matching ─────────────────────────────────────────────────────

    /// Qualifying scenarios for `trigger`, best first.
    pub async fn match_scenario(&self, trigger: &Trigger) -> HealingResult<Vec<ScenarioMatch>> {
        let system = self.metrics.system_metrics().await;
        let ranked = self.rank(trigger, &system, Utc::now());
        if ranked.is_empty() {
            return Err(no_match(trigger));
        }
        Ok(ranked.into_iter().map(|(_, m)| m).collect())
    }

    fn rank(
        &self,
        trigger: &Trigger,
        system: &SystemMetrics,
        now: DateTime<Utc>,
    ) -> Vec<(Arc<CompiledScenario>, ScenarioMatch)> {
        let config = self.config.read();
        let input = MatchInput {
            trigger,
            system,
            now,
        };

        let mut ranked: Vec<_> = self
            .scenarios
            .read()
            .iter()
            .filter_map(|compiled| {
                let stats = self.learning.stats(compiled.id());
                let rate = stats.success_rate();
                let match_score = compiled.match_score(&input, rate);
                if match_score < config.match_threshold || match_score <= 0.0 {
                    return None;
                }
                let scenario = compiled.scenario();
                let selection = selection_score(
                    scenario,
                    trigger,
                    rate,
                    stats.in_cooldown(scenario.cooldown, now),
                    &config.selection,
                );
                Some((
                    compiled.clone(),
                    ScenarioMatch {
                        scenario_id: scenario.id.clone(),
                        match_score,
                        selection_score: selection,
                    },
                ))
            })
            .collect();

        ranked.sort_by(|(_, a), (_, b)| {
            b.selection_score
                .total_cmp(&a.selection_score)
                .then_with(|| b.match_score.total_cmp(&a.match_score))
        });
        ranked
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Match, admit and run a healing session for `trigger`.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub async fn heal(&self, trigger: &Trigger) -> HealingResult<HealingSession> {
        let before = self.metrics.system_metrics().await;
        let now = Utc::now();
        let ranked = self.rank(trigger, &before, now);
        if ranked.is_empty() {
            debug!(trigger_type = %trigger.trigger_type, "No healing scenario qualifies");
            return Err(no_match(trigger));
        }

        let (compiled, session_id) = {
            let _admission = self.admission.lock();
            let limit = self.config.read().max_concurrent_healings;
            let active = self.active.len();
            if active >= limit {
                warn!(active = active, limit = limit, "Healing concurrency exhausted");
                return Err(HealingError::ConcurrencyExhausted { active, limit });
            }

            let mut vetoes = Vec::new();
            let mut chosen = None;
            for (compiled, matched) in ranked {
                let stats = self.learning.stats(compiled.id());
                match self.safety.admit(
                    compiled.scenario(),
                    trigger,
                    &stats,
                    before.health_score,
                    now,
                ) {
                    Ok(()) => {
                        chosen = Some((compiled, matched));
                        break;
                    }
                    Err(veto) => {
                        debug!(scenario_id = %compiled.id(), veto = %veto, "Scenario vetoed");
                        vetoes.push(format!("{}: {}", compiled.id(), veto));
                    }
                }
            }

            let Some((compiled, matched)) = chosen else {
                self.counters.vetoed.fetch_add(1, Ordering::Relaxed);
                warn!(vetoes = vetoes.len(), "Every qualifying healing scenario was vetoed");
                return Err(HealingError::Vetoed {
                    trigger_id: trigger.id.to_string(),
                    vetoes,
                });
            };

            let session = HealingSession::new(
                compiled.id(),
                trigger.clone(),
                matched.match_score,
                matched.selection_score,
            );
            let id = session.id.clone();
            info!(
                session_id = %id,
                scenario_id = %compiled.id(),
                match_score = matched.match_score,
                "Healing session initiated"
            );
            self.active.insert(id.clone(), session);
            (compiled, id)
        };
        let running = RunningSession {
            engine: self,
            id: &session_id,
            armed: true,
        };

        let result = self
            .run_session(&session_id, compiled.scenario(), trigger, before)
            .await;
        running.disarm();
        result
    }

    /// Fail every active session with `reason`. Returns the cancelled ids.
    pub fn cancel_all(&self, reason: &str) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.active.iter().map(|s| s.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.cancel_session(id, reason).is_ok())
            .collect()
    }

    pub fn cancel_session(&self, id: &SessionId, reason: &str) -> HealingResult<()> {
        let (_, mut session) = self
            .active
            .remove(id)
            .ok_or_else(|| HealingError::SessionNotFound(id.clone()))?;

        session.status = SessionStatus::Failed;
        session.reason = Some(reason.to_string());
        let now = Utc::now();
        session.completed_at = Some(now);
        session.duration_ms = Some((now - session.created_at).num_milliseconds().max(0) as u64);
        session
            .recommendations
            .push("Resubmit the trigger once the engine is available again".to_string());
        self.safety
            .release(&session.scenario_id, &session.trigger.source);

        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        warn!(session_id = %id, reason = %reason, "Healing session cancelled");
        self.sink.publish_completion(session.completion_record());
        self.completed.lock().push(session);
        Ok(())
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn get_session(&self, id: &SessionId) -> Option<HealingSession> {
        if let Some(session) = self.active.get(id) {
            return Some(session.clone());
        }
        self.completed.lock().find(|s| &s.id == id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Completed sessions, oldest first.
    pub fn completed_sessions(&self) -> Vec<HealingSession> {
        self.completed.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> HealingEngineStats {
        let c = &self.counters;
        HealingEngineStats {
            active: self.active.len(),
            healed: c.healed.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            rolled_back: c.rolled_back.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            vetoed: c.vetoed.load(Ordering::Relaxed),
            actions_skipped: c.actions_skipped.load(Ordering::Relaxed),
            action_timeouts: c.action_timeouts.load(Ordering::Relaxed),
            rollback_failures: c.rollback_failures.load(Ordering::Relaxed),
        }
    }

    // ── Execution ────────────────────────────────────────────────────

    async fn run_session(
        &self,
        id: &SessionId,
        scenario: &HealingScenario,
        trigger: &Trigger,
        before: SystemMetrics,
    ) -> HealingResult<HealingSession> {
        let started = Instant::now();
        let (critical_types, action_ratio_min, verification_ratio_min) = {
            let config = self.config.read();
            (
                config.critical_action_types.clone(),
                config.action_success_ratio,
                config.verification_pass_ratio,
            )
        };

        self.set_status(id, SessionStatus::Running);
        let (actions, aborted) = self.run_actions(scenario, trigger, &critical_types).await;

        let verifications = if aborted.is_none() {
            self.set_status(id, SessionStatus::Verifying);
            self.run_verifications(scenario, trigger).await
        } else {
            Vec::new()
        };

        let any_ran = actions.iter().any(|a| {
            matches!(
                a.status,
                ActionExecutionStatus::Completed | ActionExecutionStatus::Failed
            )
        });
        let (stability, after) = if any_ran {
            let (check, after) = self.stability_check(scenario).await;
            (Some(check), Some(after))
        } else {
            (None, None)
        };

        let mut phases = PhaseResults {
            actions,
            verifications,
            aborted,
            stability,
            after,
        };

        let action_ratio = action_success_ratio(&phases.actions);
        let verification_ratio = if phases.aborted.is_some() {
            0.0
        } else if phases.verifications.is_empty() {
            1.0
        } else {
            let passed = phases.verifications.iter().filter(|v| v.passed).count();
            passed as f64 / phases.verifications.len() as f64
        };
        let critical_failed = phases
            .verifications
            .iter()
            .find(|v| v.critical && !v.passed)
            .map(|v| v.step_id.clone());

        let success = phases.aborted.is_none()
            && critical_failed.is_none()
            && action_ratio >= action_ratio_min;
        let healed = success && verification_ratio >= verification_ratio_min;

        let rollback = if success {
            Vec::new()
        } else {
            self.run_rollback(scenario, trigger).await
        };

        let metrics = HealingMetrics::new(before, phases.after.take());
        let criteria = metrics
            .after
            .as_ref()
            .map(|_| CriteriaEvaluation::evaluate(&scenario.success_criteria, &metrics));

        let reason = if let Some(aborted) = &phases.aborted {
            Some(aborted.clone())
        } else if let Some(step) = &critical_failed {
            Some(format!("critical verification {} failed", step))
        } else if !success {
            Some(format!(
                "action success ratio {:.2} below {:.2}",
                action_ratio, action_ratio_min
            ))
        } else {
            None
        };

        let status = if success {
            SessionStatus::Completed
        } else if rollback.is_empty() {
            SessionStatus::Failed
        } else {
            SessionStatus::RolledBack
        };

        let outcome = HealingOutcome {
            success,
            healed,
            action_success_ratio: action_ratio,
            verification_pass_ratio: verification_ratio,
            aborted: phases.aborted.clone(),
            stability: phases.stability.clone(),
            criteria,
            rollback,
        };
        let recommendations = recommendations(&phases, &outcome, verification_ratio_min);

        let Some((_, mut session)) = self.active.remove(id) else {
            debug!(session_id = %id, "Session finished after cancellation");
            return Err(HealingError::Cancelled {
                session_id: id.clone(),
                reason: "cancelled while running".to_string(),
            });
        };

        session.status = status;
        session.actions = phases.actions;
        session.verifications = phases.verifications;
        session.metrics = Some(metrics);
        session.outcome = Some(outcome);
        session.reason = reason;
        session.recommendations = recommendations;
        session.completed_at = Some(Utc::now());
        session.duration_ms = Some(started.elapsed().as_millis() as u64);

        self.learning.record(&scenario.id, success, Utc::now());
        self.safety.release(&scenario.id, &trigger.source);
        self.count_outcome(&session);

        self.sink.publish_completion(session.completion_record());
        self.completed.lock().push(session.clone());
        Ok(session)
    }

    /// Run actions in declared order. Unmet dependencies skip; a failing
    /// critical action skips everything after it.
    async fn run_actions(
        &self,
        scenario: &HealingScenario,
        trigger: &Trigger,
        critical_types: &[ActionType],
    ) -> (Vec<ActionExecution>, Option<String>) {
        let mut executions = Vec::with_capacity(scenario.actions.len());
        let mut completed: HashSet<&str> = HashSet::new();
        let mut aborted: Option<String> = None;

        for healing_action in &scenario.actions {
            let action = healing_action.action.resolved_for(trigger);
            let mut execution = ActionExecution {
                action_id: action.id.clone(),
                action_type: action.action_type,
                target: action.target.clone(),
                critical: healing_action.is_critical(critical_types),
                status: ActionExecutionStatus::Pending,
                timed_out: false,
                duration_ms: 0,
                message: None,
            };

            let unmet = healing_action
                .dependencies
                .iter()
                .find(|d| !completed.contains(d.as_str()));
            if aborted.is_some() || unmet.is_some() {
                execution.status = ActionExecutionStatus::Skipped;
                execution.message = Some(match unmet {
                    Some(dependency) if aborted.is_none() => {
                        format!("dependency {} did not complete", dependency)
                    }
                    _ => "action phase aborted".to_string(),
                });
                debug!(action_id = %action.id, reason = ?execution.message, "Healing action skipped");
                self.counters.actions_skipped.fetch_add(1, Ordering::Relaxed);
                executions.push(execution);
                continue;
            }

            let action_started = Instant::now();
            match execute_with_timeout(self.executor.as_ref(), &action, trigger).await {
                Ok(report) => {
                    debug!(action_id = %action.id, target = %action.target, "Healing action completed");
                    execution.status = ActionExecutionStatus::Completed;
                    execution.message = Some(report.message);
                    completed.insert(healing_action.id());
                }
                Err(e) => {
                    execution.status = ActionExecutionStatus::Failed;
                    execution.timed_out = e.is_timeout();
                    execution.message = Some(e.to_string());
                    if e.is_timeout() {
                        self.counters.action_timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    if execution.critical {
                        warn!(action_id = %action.id, error = %e, "Critical healing action failed, aborting");
                        aborted = Some(format!("critical action {} failed: {}", action.id, e));
                    } else {
                        warn!(action_id = %action.id, error = %e, "Healing action failed");
                    }
                }
            }
            execution.duration_ms = action_started.elapsed().as_millis() as u64;
            executions.push(execution);
        }

        (executions, aborted)
    }

    /// Run verification steps in order, stopping at the first critical
    /// failure.
    async fn run_verifications(
        &self,
        scenario: &HealingScenario,
        trigger: &Trigger,
    ) -> Vec<VerificationResult> {
        let system = self.metrics.system_metrics().await;
        let mut results = Vec::with_capacity(scenario.verifications.len());

        for step in &scenario.verifications {
            let (passed, observed) = match &step.check {
                VerificationCheck::HealthScore { min } => {
                    (system.health_score >= *min, Some(system.health_score))
                }
                VerificationCheck::ComponentHealth { component, min } => {
                    let component = if component == SOURCE_TARGET {
                        trigger.source.as_str()
                    } else {
                        component.as_str()
                    };
                    let health = self.metrics.component_health(component).await;
                    (health >= *min, Some(health))
                }
                VerificationCheck::ErrorRate { max } => {
                    (system.error_rate <= *max, Some(system.error_rate))
                }
                VerificationCheck::ResponseTime { max_ms } => (
                    system.response_time_ms <= *max_ms,
                    Some(system.response_time_ms),
                ),
                VerificationCheck::ConditionResolved => {
                    (self.metrics.is_resolved(trigger).await, None)
                }
            };

            results.push(VerificationResult {
                step_id: step.id.clone(),
                critical: step.critical,
                passed,
                observed,
                detail: step.check.to_string(),
            });

            if !passed && step.critical {
                warn!(step_id = %step.id, check = %step.check, "Critical verification failed");
                break;
            }
        }
        results
    }

    async fn stability_check(&self, scenario: &HealingScenario) -> (StabilityCheck, SystemMetrics) {
        let criteria = &scenario.success_criteria;
        let waited = Instant::now();
        tokio::time::sleep(criteria.stability_period).await;
        let after = self.metrics.system_metrics().await;

        let check = StabilityCheck {
            waited_ms: waited.elapsed().as_millis() as u64,
            health: after.health_score,
            stable: after.health_score >= criteria.health_score,
        };
        debug!(health = check.health, stable = check.stable, "Stability check");
        (check, after)
    }

    /// Best-effort compensation. Failures are logged and recorded.
    async fn run_rollback(
        &self,
        scenario: &HealingScenario,
        trigger: &Trigger,
    ) -> Vec<RollbackExecution> {
        let mut executions = Vec::with_capacity(scenario.rollback.len());
        for step in &scenario.rollback {
            let action = step.resolved_for(trigger);
            match execute_with_timeout(self.executor.as_ref(), &action, trigger).await {
                Ok(_) => executions.push(RollbackExecution {
                    action_id: action.id,
                    success: true,
                    error: None,
                }),
                Err(e) => {
                    self.counters.rollback_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(scenario_id = %scenario.id, action_id = %action.id, error = %e, "Healing rollback step failed");
                    executions.push(RollbackExecution {
                        action_id: action.id,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        executions
    }

    fn set_status(&self, id: &SessionId, status: SessionStatus) {
        if let Some(mut session) = self.active.get_mut(id) {
            session.status = status;
        }
    }

    fn count_outcome(&self, session: &HealingSession) {
        let c = &self.counters;
        match session.status {
            SessionStatus::Completed => {
                c.succeeded.fetch_add(1, Ordering::Relaxed);
                if session.healed() {
                    c.healed.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    session_id = %session.id,
                    scenario_id = %session.scenario_id,
                    healed = session.healed(),
                    duration_ms = session.duration_ms.unwrap_or(0),
                    "Healing session completed"
                );
            }
            status => {
                if status == SessionStatus::RolledBack {
                    c.rolled_back.fetch_add(1, Ordering::Relaxed);
                }
                c.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %session.id,
                    scenario_id = %session.scenario_id,
                    status = %status,
                    reason = session.reason.as_deref().unwrap_or("unknown"),
                    "Healing session failed"
                );
            }
        }
    }
}

fn compile_catalog(config: &HealingConfig) -> HealingResult<Vec<Arc<CompiledScenario>>> {
    let scenarios = if config.scenarios.is_empty() {
        default_scenarios()
    } else {
        config.scenarios.clone()
    };
    scenarios.into_iter().map(CompiledScenario::compile).collect()
}

fn no_match(trigger: &Trigger) -> HealingError {
    HealingError::NoMatchingScenario {
        trigger_id: trigger.id.to_string(),
        trigger_type: trigger.trigger_type.clone(),
    }
}

/// Completed over executed. Skipped actions do not count.
fn action_success_ratio(actions: &[ActionExecution]) -> f64 {
    let completed = actions
        .iter()
        .filter(|a| a.status == ActionExecutionStatus::Completed)
        .count();
    let failed = actions
        .iter()
        .filter(|a| a.status == ActionExecutionStatus::Failed)
        .count();
    match completed + failed {
        0 => 0.0,
        executed => completed as f64 / executed as f64,
    }
}

fn recommendations(
    phases: &PhaseResults,
    outcome: &HealingOutcome,
    verification_ratio_min: f64,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    for action in &phases.actions {
        match action.status {
            ActionExecutionStatus::Failed if action.timed_out => recommendations.push(format!(
                "Action {} timed out; check {} responsiveness or raise its timeout",
                action.action_id, action.target
            )),
            ActionExecutionStatus::Failed => recommendations.push(format!(
                "Inspect {} before retrying {}",
                action.target, action.action_id
            )),
            _ => {}
        }
    }

    for step in phases.verifications.iter().filter(|v| !v.passed) {
        recommendations.push(format!("Verification {} failed ({})", step.step_id, step.detail));
    }

    if outcome.success && !outcome.healed {
        recommendations.push(format!(
            "Only {:.0}% of verification steps passed (target {:.0}%); keep monitoring",
            outcome.verification_pass_ratio * 100.0,
            verification_ratio_min * 100.0
        ));
    }

    if let Some(stability) = &phases.stability {
        if !stability.stable {
            recommendations.push(format!(
                "System health {:.2} after the stability period is below target",
                stability.health
            ));
        }
    }

    if let Some(criteria) = &outcome.criteria {
        if !criteria.performance_met {
            recommendations.push("Response time did not improve as required".to_string());
        }
        if !criteria.error_rate_met {
            recommendations.push("Error rate did not drop as required".to_string());
        }
    }

    for step in outcome.rollback.iter().filter(|r| !r.success) {
        recommendations.push(format!(
            "Rollback step {} failed; manual cleanup may be needed",
            step.action_id
        ));
    }
    recommendations
}


/// Fails the session and frees its safety slot if the healing future is
/// dropped before the session finishes.
struct RunningSession<'a> {
    engine: &'a SelfHealingEngine,
    id: &'a SessionId,
    armed: bool,
}

impl RunningSession<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunningSession<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.engine.cancel_session(self.id, ABANDONED_REASON);
        }
    }
}
