//! Recovery workflow engine.
//!
//! Matches a trigger to the best safe strategy, runs its actions in order,
//! rolls back the first failing action and verifies the result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use swarm_types::{
    execute_with_timeout, Action, ActionExecutor, BoundedHistory, MetricsSource, MonitoringSink,
    Trigger, WorkflowId,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::catalog::default_strategies;
use crate::config::RecoveryConfig;
use crate::context::{PriorAttempt, RecoveryContext};
use crate::error::{RecoveryError, RecoveryResult};
use crate::learning::LearningEngine;
use crate::safety::{SafetyMonitor, Veto};
use crate::scoring::{score_strategy, ScoreBreakdown};
use crate::strategy::RecoveryStrategy;
use crate::workflow::{
    ActionRecord, Attempt, AttemptStatus, RollbackStep, VerificationOutcome, Workflow,
    WorkflowStatus,
};

/// Attempts a strategy needs before its success rate is judged.
const MIN_ATTEMPTS_FOR_DEGRADATION: u64 = 3;

/// Failure reason of a workflow whose execution was dropped mid-run.
pub const ABANDONED_REASON: &str = "execution abandoned before completion";

/// How one candidate fared during selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    pub strategy_id: String,
    pub score: f64,
    pub excluded: Option<String>,
    pub veto: Option<Veto>,
}

/// The chosen strategy and every ranked candidate.
#[derive(Debug, Clone)]
pub struct StrategySelection {
    pub strategy: RecoveryStrategy,
    pub score: ScoreBreakdown,
    pub candidates: Vec<CandidateEvaluation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEngineStats {
    pub active: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub action_failures: u64,
    pub action_timeouts: u64,
    pub rollbacks_failed: u64,
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    action_failures: AtomicU64,
    action_timeouts: AtomicU64,
    rollbacks_failed: AtomicU64,
}

pub struct RecoveryWorkflowEngine {
    config: RwLock<RecoveryConfig>,
    strategies: RwLock<Vec<RecoveryStrategy>>,
    learning: LearningEngine,
    safety: SafetyMonitor,
    executor: Arc<dyn ActionExecutor>,
    metrics: Arc<dyn MetricsSource>,
    sink: Arc<dyn MonitoringSink>,
    active: DashMap<WorkflowId, Workflow>,
    completed: Mutex<BoundedHistory<Workflow>>,
    attempt_log: Mutex<BoundedHistory<PriorAttempt>>,
    admission: Mutex<()>,
    counters: Counters,
}

impl RecoveryWorkflowEngine {
    pub fn new(
        config: RecoveryConfig,
        executor: Arc<dyn ActionExecutor>,
        metrics: Arc<dyn MetricsSource>,
        sink: Arc<dyn MonitoringSink>,
    ) -> RecoveryResult<Self> {
        config.validate()?;

        let strategies = if config.strategies.is_empty() {
            default_strategies()
        } else {
            config.strategies.clone()
        };

        Ok(Self {
            strategies: RwLock::new(strategies),
            learning: LearningEngine::new(),
            safety: SafetyMonitor::new(config.safety.clone()),
            executor,
            metrics,
            sink,
            active: DashMap::new(),
            completed: Mutex::new(BoundedHistory::new(config.history_limit)),
            attempt_log: Mutex::new(BoundedHistory::new(config.attempt_log_limit)),
            admission: Mutex::new(()),
            counters: Counters::default(),
            config: RwLock::new(config),
        })
    }

    // ── Catalog ──────────────────────────────────────────────────────

    /// Add a strategy, replacing any with the same id.
    pub fn register_strategy(&self, strategy: RecoveryStrategy) -> RecoveryResult<()> {
        strategy.validate(self.config.read().max_rollback_depth)?;

        let mut strategies = self.strategies.write();
        match strategies.iter_mut().find(|s| s.id == strategy.id) {
            Some(existing) => *existing = strategy.clone(),
            None => strategies.push(strategy.clone()),
        }
        info!(strategy_id = %strategy.id, strategy_type = %strategy.strategy_type, "Recovery strategy registered");
        Ok(())
    }

    pub fn remove_strategy(&self, strategy_id: &str) -> bool {
        let mut strategies = self.strategies.write();
        let before = strategies.len();
        strategies.retain(|s| s.id != strategy_id);
        strategies.len() != before
    }

    /// Observed success rate per strategy id.
    pub fn success_rates(&self) -> BTreeMap<String, f64> {
        self.learning.success_rates()
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    /// Apply new configuration. A non-empty strategy list replaces the
    /// catalog; an empty one keeps the current catalog.
    pub fn apply_config(&self, config: RecoveryConfig) -> RecoveryResult<()> {
        config.validate()?;

        self.safety.update_config(config.safety.clone());
        self.completed.lock().set_capacity(config.history_limit);
        self.attempt_log.lock().set_capacity(config.attempt_log_limit);
        if !config.strategies.is_empty() {
            *self.strategies.write() = config.strategies.clone();
        }
        *self.config.write() = config;
        info!("Recovery configuration applied");
        Ok(())
    }

    // ── Selection ────────────────────────────────────────────────────

    /// Snapshot metrics and prior attempts for `trigger`.
    pub async fn build_context(&self, trigger: &Trigger) -> RecoveryContext {
        let system = self.metrics.system_metrics().await;
        let previous = self.attempt_log.lock().iter().cloned().collect();
        RecoveryContext::new(trigger.clone(), system, previous, Utc::now())
    }

    /// Rank matching strategies and pick the best one the safety monitor
    /// approves.
    pub fn select_strategy(&self, context: &RecoveryContext) -> RecoveryResult<StrategySelection> {
        let scoring = self.config.read().scoring.clone();
        let trigger = &context.trigger;

        let mut ranked: Vec<(RecoveryStrategy, ScoreBreakdown)> = self
            .strategies
            .read()
            .iter()
            .filter_map(|strategy| {
                let rate = self.learning.success_rate(&strategy.id);
                let score = score_strategy(strategy, context, rate, &scoring);
                score.matched.then(|| (strategy.clone(), score))
            })
            .collect();

        if ranked.is_empty() {
            return Err(RecoveryError::NoMatchingStrategy {
                trigger_id: trigger.id.to_string(),
                trigger_type: trigger.trigger_type.clone(),
            });
        }

        ranked.sort_by(|(a, a_score), (b, b_score)| {
            b_score
                .total
                .total_cmp(&a_score.total)
                .then_with(|| b.priority.cmp(&a.priority))
        });

        let mut chosen = None;
        let mut candidates = Vec::with_capacity(ranked.len());
        let mut vetoes = Vec::new();

        for (strategy, score) in ranked {
            let mut evaluation = CandidateEvaluation {
                strategy_id: strategy.id.clone(),
                score: score.total,
                excluded: None,
                veto: None,
            };

            let failures = context.failures_for_trigger(&strategy.id);
            if failures >= strategy.max_retries {
                let reason = format!("retries exhausted ({}/{})", failures, strategy.max_retries);
                vetoes.push(format!("{}: {}", strategy.id, reason));
                evaluation.excluded = Some(reason);
            } else if chosen.is_none() {
                match self.safety.evaluate(&strategy, trigger, context.captured_at) {
                    Ok(()) => chosen = Some((strategy, score)),
                    Err(veto) => {
                        debug!(strategy_id = %strategy.id, veto = %veto, "Strategy vetoed");
                        vetoes.push(format!("{}: {}", strategy.id, veto));
                        evaluation.veto = Some(veto);
                    }
                }
            }
            candidates.push(evaluation);
        }

        match chosen {
            Some((strategy, score)) => Ok(StrategySelection {
                strategy,
                score,
                candidates,
            }),
            None => {
                warn!(trigger_id = %trigger.id, vetoes = vetoes.len(), "No safe recovery strategy");
                Err(RecoveryError::NoSafeStrategy {
                    trigger_id: trigger.id.to_string(),
                    vetoes,
                })
            }
        }
    }

    // ── Workflow lifecycle ───────────────────────────────────────────

    /// Select a strategy and register a workflow for it without running it.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub async fn create_workflow(&self, trigger: &Trigger) -> RecoveryResult<WorkflowId> {
        let context = self.build_context(trigger).await;
        let selection = self.select_strategy(&context)?;

        let _admission = self.admission.lock();
        let limit = self.config.read().max_concurrent_recoveries;
        let active = self.active.len();
        if active >= limit {
            warn!(active = active, limit = limit, "Recovery concurrency exhausted");
            return Err(RecoveryError::ConcurrencyExhausted { active, limit });
        }

        let workflow = Workflow::new(selection.strategy, selection.score, context);
        let id = workflow.id.clone();
        info!(
            workflow_id = %id,
            strategy_id = %workflow.strategy.id,
            score = workflow.score.total,
            "Recovery workflow created"
        );
        self.active.insert(id.clone(), workflow);
        Ok(id)
    }

    /// Run a created workflow to completion.
    #[instrument(skip(self), fields(workflow_id = %id))]
    pub async fn execute_workflow(&self, id: &WorkflowId) -> RecoveryResult<Workflow> {
        let mut workflow = {
            let mut entry = self
                .active
                .get_mut(id)
                .ok_or_else(|| RecoveryError::WorkflowNotFound(id.clone()))?;
            if entry.status != WorkflowStatus::Created {
                return Err(RecoveryError::InvalidState {
                    workflow_id: id.clone(),
                    status: entry.status,
                    operation: "execute",
                });
            }
            entry.status = WorkflowStatus::Running;
            entry.started_at = Some(Utc::now());
            entry.clone()
        };
        let running = RunningWorkflow {
            engine: self,
            id,
            armed: true,
        };

        let started = Instant::now();
        let trigger = workflow.context.trigger.clone();
        let confidence = workflow.score.total / 100.0;

        let attempt = self.run_attempt(&workflow.strategy, &trigger, confidence).await;
        let attempt_completed = attempt.status == AttemptStatus::Completed;
        let verification = if attempt_completed {
            Some(self.verify(&workflow.strategy, &trigger).await)
        } else {
            None
        };

        workflow.success = verification.as_ref().is_some_and(|v| v.passed);
        workflow.status = if workflow.success {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        workflow.reason = failure_reason(&attempt, verification.as_ref());
        workflow.recommendations = self.recommendations(&attempt, verification.as_ref());
        workflow.verification = verification;
        workflow.attempts.push(attempt);

        self.record_learning(&mut workflow);
        running.disarm();
        self.finish(workflow, started)
    }

    /// Create and execute a workflow for `trigger`.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub async fn recover(&self, trigger: &Trigger) -> RecoveryResult<Workflow> {
        let id = self.create_workflow(trigger).await?;
        self.execute_workflow(&id).await
    }

    /// Hold a created workflow back from execution.
    pub fn pause_workflow(&self, id: &WorkflowId) -> RecoveryResult<()> {
        self.transition(id, WorkflowStatus::Created, WorkflowStatus::Paused, "pause")
    }

    pub fn resume_workflow(&self, id: &WorkflowId) -> RecoveryResult<()> {
        self.transition(id, WorkflowStatus::Paused, WorkflowStatus::Created, "resume")
    }

    /// Fail every active workflow with `reason`. Returns the cancelled ids.
    pub fn cancel_all(&self, reason: &str) -> Vec<WorkflowId> {
        let ids: Vec<WorkflowId> = self.active.iter().map(|w| w.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.cancel_workflow(id, reason).is_ok())
            .collect()
    }

    pub fn cancel_workflow(&self, id: &WorkflowId, reason: &str) -> RecoveryResult<()> {
        let (_, mut workflow) = self
            .active
            .remove(id)
            .ok_or_else(|| RecoveryError::WorkflowNotFound(id.clone()))?;

        workflow.status = WorkflowStatus::Failed;
        workflow.success = false;
        workflow.reason = Some(reason.to_string());
        workflow.completed_at = Some(Utc::now());
        workflow.actual_duration_ms = workflow
            .started_at
            .map(|s| (Utc::now() - s).num_milliseconds().max(0) as u64);
        workflow
            .recommendations
            .push("Resubmit the trigger once the engine is available again".to_string());

        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        warn!(workflow_id = %id, reason = %reason, "Recovery workflow cancelled");
        self.sink.publish_completion(workflow.completion_record());
        self.completed.lock().push(workflow);
        Ok(())
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn get_workflow(&self, id: &WorkflowId) -> Option<Workflow> {
        if let Some(workflow) = self.active.get(id) {
            return Some(workflow.clone());
        }
        self.completed.lock().find(|w| &w.id == id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Completed workflows, oldest first.
    pub fn completed_workflows(&self) -> Vec<Workflow> {
        self.completed.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> RecoveryEngineStats {
        let c = &self.counters;
        RecoveryEngineStats {
            active: self.active.len(),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            action_failures: c.action_failures.load(Ordering::Relaxed),
            action_timeouts: c.action_timeouts.load(Ordering::Relaxed),
            rollbacks_failed: c.rollbacks_failed.load(Ordering::Relaxed),
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn transition(
        &self,
        id: &WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
        operation: &'static str,
    ) -> RecoveryResult<()> {
        let mut workflow = self
            .active
            .get_mut(id)
            .ok_or_else(|| RecoveryError::WorkflowNotFound(id.clone()))?;
        if workflow.status != from {
            return Err(RecoveryError::InvalidState {
                workflow_id: id.clone(),
                status: workflow.status,
                operation,
            });
        }
        workflow.status = to;
        debug!(workflow_id = %id, status = %to, "Workflow status changed");
        Ok(())
    }

    /// Run the strategy's actions in order. The first failure runs that
    /// action's rollback chain and stops the attempt.
    async fn run_attempt(
        &self,
        strategy: &RecoveryStrategy,
        trigger: &Trigger,
        confidence: f64,
    ) -> Attempt {
        let mut attempt = Attempt::new(&strategy.id, confidence);
        attempt.status = AttemptStatus::Running;
        let started = Instant::now();

        for action in &strategy.actions {
            let action = action.resolved_for(trigger);
            let action_started = Instant::now();
            let outcome = execute_with_timeout(self.executor.as_ref(), &action, trigger).await;
            let duration_ms = action_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(report) => {
                    debug!(action_id = %action.id, target = %action.target, "Action completed");
                    attempt.actions.push(ActionRecord {
                        action_id: action.id.clone(),
                        action_type: action.action_type,
                        target: action.target.clone(),
                        success: true,
                        timed_out: false,
                        duration_ms,
                        message: report.message,
                        rollback: Vec::new(),
                    });
                }
                Err(e) => {
                    self.counters.action_failures.fetch_add(1, Ordering::Relaxed);
                    if e.is_timeout() {
                        self.counters.action_timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(action_id = %action.id, target = %action.target, error = %e, "Action failed, rolling back");

                    let rollback = self.run_rollback(&action, trigger).await;
                    let compensated = rollback.last().is_some_and(|s| s.success);

                    attempt.actions.push(ActionRecord {
                        action_id: action.id.clone(),
                        action_type: action.action_type,
                        target: action.target.clone(),
                        success: false,
                        timed_out: e.is_timeout(),
                        duration_ms,
                        message: e.to_string(),
                        rollback,
                    });
                    attempt.error = Some(e.to_string());
                    attempt.status = if compensated {
                        AttemptStatus::RolledBack
                    } else {
                        AttemptStatus::Failed
                    };
                    break;
                }
            }
        }

        if attempt.status == AttemptStatus::Running {
            attempt.status = AttemptStatus::Completed;
            attempt.result = Some(format!("{} actions completed", attempt.actions.len()));
        }
        attempt.duration_ms = started.elapsed().as_millis() as u64;
        attempt
    }

    /// Walk the rollback chain until one step succeeds. Failures are logged
    /// and recorded, never escalated.
    async fn run_rollback(&self, action: &Action, trigger: &Trigger) -> Vec<RollbackStep> {
        let max_depth = self.config.read().max_rollback_depth;
        let mut steps = Vec::new();
        let mut next = action.rollback_action.as_deref();

        while let Some(step) = next {
            if steps.len() >= max_depth {
                warn!(action_id = %action.id, max_depth = max_depth, "Rollback chain truncated");
                break;
            }
            let rollback = step.resolved_for(trigger);
            match execute_with_timeout(self.executor.as_ref(), &rollback, trigger).await {
                Ok(_) => {
                    info!(action_id = %action.id, rollback_id = %rollback.id, "Rollback succeeded");
                    steps.push(RollbackStep {
                        action_id: rollback.id,
                        success: true,
                        error: None,
                    });
                    break;
                }
                Err(e) => {
                    self.counters.rollbacks_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(action_id = %action.id, rollback_id = %rollback.id, error = %e, "Rollback failed");
                    steps.push(RollbackStep {
                        action_id: rollback.id,
                        success: false,
                        error: Some(e.to_string()),
                    });
                    next = step.rollback_action.as_deref();
                }
            }
        }
        steps
    }

    /// Resolved AND system health above threshold AND every affected
    /// component above threshold.
    async fn verify(&self, strategy: &RecoveryStrategy, trigger: &Trigger) -> VerificationOutcome {
        let thresholds = self.config.read().verification.clone();

        let error_resolved = self.metrics.is_resolved(trigger).await;
        let system_health = self.metrics.system_metrics().await.health_score;

        let mut components = trigger.affected_components();
        if components.is_empty() {
            for action in &strategy.actions {
                let target = action.resolved_for(trigger).target;
                if !components.contains(&target) {
                    components.push(target);
                }
            }
        }

        let mut component_health = BTreeMap::new();
        for component in components {
            let health = self.metrics.component_health(&component).await;
            component_health.insert(component, health);
        }

        let passed = error_resolved
            && system_health > thresholds.system_health_threshold
            && component_health
                .values()
                .all(|h| *h > thresholds.component_health_threshold);

        VerificationOutcome {
            error_resolved,
            system_health,
            component_health,
            passed,
        }
    }

    fn record_learning(&self, workflow: &mut Workflow) {
        let strategy = &workflow.strategy;
        let trigger = &workflow.context.trigger;
        let now = Utc::now();

        let stats = self.learning.record(&strategy.id, workflow.success);
        self.safety.record_outcome(trigger, workflow.success, now);
        self.attempt_log.lock().push(PriorAttempt {
            strategy_id: strategy.id.clone(),
            trigger_id: trigger.id.as_str().to_string(),
            success: workflow.success,
            at: now,
        });

        let rate = stats.success_rate();
        if stats.attempts >= MIN_ATTEMPTS_FOR_DEGRADATION && rate < strategy.success_threshold {
            warn!(
                strategy_id = %strategy.id,
                success_rate = rate,
                threshold = strategy.success_threshold,
                "Recovery strategy degraded"
            );
            workflow.recommendations.push(format!(
                "Strategy {} succeeds {:.0}% of the time (threshold {:.0}%); review its actions",
                strategy.id,
                rate * 100.0,
                strategy.success_threshold * 100.0
            ));
        }
    }

    fn finish(&self, mut workflow: Workflow, started: Instant) -> RecoveryResult<Workflow> {
        workflow.completed_at = Some(Utc::now());
        workflow.actual_duration_ms = Some(started.elapsed().as_millis() as u64);

        if self.active.remove(&workflow.id).is_none() {
            debug!(workflow_id = %workflow.id, "Workflow finished after cancellation");
            return Err(RecoveryError::Cancelled {
                workflow_id: workflow.id.clone(),
                reason: "cancelled while running".to_string(),
            });
        }

        if workflow.success {
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            info!(
                workflow_id = %workflow.id,
                strategy_id = %workflow.strategy.id,
                duration_ms = workflow.actual_duration_ms.unwrap_or(0),
                "Recovery workflow completed"
            );
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                workflow_id = %workflow.id,
                strategy_id = %workflow.strategy.id,
                reason = workflow.reason.as_deref().unwrap_or("unknown"),
                "Recovery workflow failed"
            );
        }

        self.sink.publish_completion(workflow.completion_record());
        self.completed.lock().push(workflow.clone());
        Ok(workflow)
    }

    fn recommendations(
        &self,
        attempt: &Attempt,
        verification: Option<&VerificationOutcome>,
    ) -> Vec<String> {
        let thresholds = self.config.read().verification.clone();
        let mut recommendations = Vec::new();

        if let Some(failed) = attempt.actions.iter().find(|a| !a.success) {
            if failed.timed_out {
                recommendations.push(format!(
                    "Action {} timed out; check {} responsiveness or raise its timeout",
                    failed.action_id, failed.target
                ));
            } else {
                recommendations.push(format!(
                    "Inspect {} before retrying: {}",
                    failed.target, failed.message
                ));
            }
            if !failed.rollback.is_empty() && !failed.rollback.iter().any(|s| s.success) {
                recommendations.push(format!(
                    "Rollback of {} did not succeed; {} may need manual cleanup",
                    failed.action_id, failed.target
                ));
            }
        }

        if let Some(v) = verification {
            if !v.error_resolved {
                recommendations.push(
                    "Originating condition persists; escalate to a more aggressive strategy"
                        .to_string(),
                );
            }
            if v.system_health <= thresholds.system_health_threshold {
                recommendations.push(format!(
                    "System health {:.2} is below {:.2}; monitor before further changes",
                    v.system_health, thresholds.system_health_threshold
                ));
            }
            for (component, health) in &v.component_health {
                if *health <= thresholds.component_health_threshold {
                    recommendations.push(format!(
                        "Component {} health {:.2} is below {:.2}",
                        component, health, thresholds.component_health_threshold
                    ));
                }
            }
        }
        recommendations
    }
}

/// Fails the workflow if its execution future is dropped before it
/// finishes, so it never lingers in the active set.
struct RunningWorkflow<'a> {
    engine: &'a RecoveryWorkflowEngine,
    id: &'a WorkflowId,
    armed: bool,
}

impl RunningWorkflow<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunningWorkflow<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.engine.cancel_workflow(self.id, ABANDONED_REASON);
        }
    }
}

fn failure_reason(attempt: &Attempt, verification: Option<&VerificationOutcome>) -> Option<String> {
    if let Some(error) = &attempt.error {
        return Some(error.clone());
    }
    match verification {
        Some(v) if !v.passed => Some(if !v.error_resolved {
            "verification failed: error not resolved".to_string()
        } else {
            "verification failed: health below threshold".to_string()
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use crate::strategy::{MatchCondition, StrategyType};
    use std::time::Duration;
    use swarm_types::{
        ActionType, FixedMetricsSource, MemorySink, Severity, SimulatedActionExecutor,
        SOURCE_TARGET,
    };

    fn trigger() -> Trigger {
        Trigger::new("agent_timeout", Severity::Medium, "agent").with_source("agent-7")
    }

    fn restart_then_scale() -> RecoveryStrategy {
        RecoveryStrategy::new(
            "restart-then-scale",
            StrategyType::Standard,
            MatchCondition::any().error_types(["agent_timeout"]),
            vec![
                Action::new("restart", ActionType::Restart, SOURCE_TARGET).with_rollback(
                    Action::new("undo-restart", ActionType::Rollback, SOURCE_TARGET)
                        .with_rollback(Action::new("hard-reset", ActionType::Rollback, SOURCE_TARGET)),
                ),
                Action::new("scale", ActionType::Scale, SOURCE_TARGET),
            ],
        )
    }

    fn lenient_safety() -> SafetyConfig {
        SafetyConfig {
            max_cascading_failures: 100,
            quarantine_after_failures: 100,
            ..Default::default()
        }
    }

    struct Harness {
        engine: RecoveryWorkflowEngine,
        executor: Arc<SimulatedActionExecutor>,
        metrics: Arc<FixedMetricsSource>,
        sink: Arc<MemorySink>,
    }

    fn harness(executor: SimulatedActionExecutor, config: RecoveryConfig) -> Harness {
        let executor = Arc::new(executor);
        let metrics = Arc::new(FixedMetricsSource::healthy());
        let sink = Arc::new(MemorySink::new());
        let engine = RecoveryWorkflowEngine::new(
            RecoveryConfig {
                strategies: vec![restart_then_scale()],
                safety: lenient_safety(),
                ..config
            },
            executor.clone(),
            metrics.clone(),
            sink.clone(),
        )
        .unwrap();
        Harness {
            engine,
            executor,
            metrics,
            sink,
        }
    }

    #[tokio::test]
    async fn test_successful_workflow_moves_to_history() {
        let h = harness(SimulatedActionExecutor::new(), RecoveryConfig::default());

        let workflow = h.engine.recover(&trigger()).await.unwrap();

        assert!(workflow.success);
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert!(workflow.error_resolved());
        assert_eq!(h.executor.calls(), vec!["restart", "scale"]);
        assert_eq!(workflow.attempts[0].actions[0].target, "agent-7");
        assert_eq!(h.engine.active_count(), 0);
        assert_eq!(h.engine.completed_workflows().len(), 1);
        assert_eq!(h.sink.completions().len(), 1);
        assert_eq!(h.engine.success_rates()["restart-then-scale"], 1.0);
    }

    #[tokio::test]
    async fn test_first_action_failure_rolls_back_once_and_stops() {
        let h = harness(
            SimulatedActionExecutor::new().fail_action("restart"),
            RecoveryConfig::default(),
        );

        let workflow = h.engine.recover(&trigger()).await.unwrap();
        let attempt = &workflow.attempts[0];

        assert_eq!(h.executor.calls(), vec!["restart", "undo-restart"]);
        assert_eq!(h.executor.call_count("undo-restart"), 1);
        assert_eq!(h.executor.call_count("scale"), 0);
        assert_eq!(attempt.status, AttemptStatus::RolledBack);
        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert!(!workflow.success);
        assert!(workflow.reason.is_some());
        assert!(!workflow.recommendations.is_empty());
        assert!(workflow.verification.is_none());
    }

    #[tokio::test]
    async fn test_failed_rollback_walks_chain() {
        let h = harness(
            SimulatedActionExecutor::new()
                .fail_action("restart")
                .fail_action("undo-restart"),
            RecoveryConfig::default(),
        );

        let workflow = h.engine.recover(&trigger()).await.unwrap();
        let record = &workflow.attempts[0].actions[0];

        assert_eq!(h.executor.calls(), vec!["restart", "undo-restart", "hard-reset"]);
        assert_eq!(record.rollback.len(), 2);
        assert!(!record.rollback[0].success);
        assert!(record.rollback[1].success);
        assert_eq!(h.engine.stats().rollbacks_failed, 1);
    }

    #[tokio::test]
    async fn test_verification_requires_component_health() {
        let h = harness(SimulatedActionExecutor::new(), RecoveryConfig::default());
        h.metrics.set_component_health("agent-7", 0.5);

        let workflow = h.engine.recover(&trigger()).await.unwrap();
        let verification = workflow.verification.clone().unwrap();

        assert!(verification.error_resolved);
        assert!(!verification.passed);
        assert!(!workflow.success);
        assert!(workflow
            .recommendations
            .iter()
            .any(|r| r.contains("agent-7")));
    }

    #[tokio::test]
    async fn test_unresolved_error_fails_verification() {
        let h = harness(SimulatedActionExecutor::new(), RecoveryConfig::default());
        h.metrics.mark_unresolved("agent_timeout");

        let workflow = h.engine.recover(&trigger()).await.unwrap();
        assert!(!workflow.success);
        assert!(!workflow.error_resolved());
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let h = harness(
            SimulatedActionExecutor::new(),
            RecoveryConfig {
                max_concurrent_recoveries: 1,
                ..Default::default()
            },
        );

        h.engine.create_workflow(&trigger()).await.unwrap();
        let refused = h.engine.create_workflow(&trigger()).await;
        assert!(matches!(
            refused,
            Err(RecoveryError::ConcurrencyExhausted { active: 1, limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let h = harness(SimulatedActionExecutor::new(), RecoveryConfig::default());
        let id = h.engine.create_workflow(&trigger()).await.unwrap();

        h.engine.pause_workflow(&id).unwrap();
        assert!(matches!(
            h.engine.execute_workflow(&id).await,
            Err(RecoveryError::InvalidState { .. })
        ));

        h.engine.resume_workflow(&id).unwrap();
        let workflow = h.engine.execute_workflow(&id).await.unwrap();
        assert!(workflow.success);
        assert!(h.engine.pause_workflow(&id).is_err());
    }

    #[tokio::test]
    async fn test_cancel_all_publishes_records() {
        let h = harness(SimulatedActionExecutor::new(), RecoveryConfig::default());
        let a = h.engine.create_workflow(&trigger()).await.unwrap();
        h.engine.create_workflow(&trigger()).await.unwrap();

        let cancelled = h.engine.cancel_all("shutdown");
        assert_eq!(cancelled.len(), 2);
        assert_eq!(h.engine.active_count(), 0);

        let workflow = h.engine.get_workflow(&a).unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert_eq!(workflow.reason.as_deref(), Some("shutdown"));
        assert_eq!(h.sink.completions().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_for_same_trigger() {
        let h = harness(
            SimulatedActionExecutor::new().fail_action("restart"),
            RecoveryConfig::default(),
        );
        h.engine
            .register_strategy(restart_then_scale().with_max_retries(1))
            .unwrap();
        let trigger = trigger();

        h.engine.recover(&trigger).await.unwrap();
        match h.engine.recover(&trigger).await {
            Err(RecoveryError::NoSafeStrategy { vetoes, .. }) => {
                assert!(vetoes[0].contains("retries exhausted"))
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }

        // a fresh trigger is still eligible
        assert!(h.engine.recover(&self::trigger()).await.is_ok());
    }

    #[tokio::test]
    async fn test_degraded_strategy_recommendation() {
        let h = harness(
            SimulatedActionExecutor::new().fail_action("restart"),
            RecoveryConfig::default(),
        );

        let mut last = None;
        for _ in 0..3 {
            last = Some(h.engine.recover(&trigger()).await.unwrap());
        }
        let workflow = last.unwrap();
        assert!(workflow
            .recommendations
            .iter()
            .any(|r| r.contains("restart-then-scale succeeds 0%")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_execution_fails_workflow() {
        let h = harness(
            SimulatedActionExecutor::new().delay_action("restart", Duration::from_secs(20)),
            RecoveryConfig {
                max_concurrent_recoveries: 1,
                ..Default::default()
            },
        );

        let dropped = tokio::time::timeout(Duration::from_secs(1), h.engine.recover(&trigger())).await;
        assert!(dropped.is_err());

        assert_eq!(h.engine.active_count(), 0);
        let workflow = h.engine.completed_workflows().pop().unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert_eq!(workflow.reason.as_deref(), Some(ABANDONED_REASON));
        assert_eq!(h.sink.completions().len(), 1);

        // the slot is free again
        h.engine.create_workflow(&trigger()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_timeout_counted_separately() {
        let strategy = RecoveryStrategy::new(
            "slow",
            StrategyType::Standard,
            MatchCondition::any(),
            vec![Action::new("restart", ActionType::Restart, "svc")
                .with_timeout(Duration::from_millis(100))],
        );
        let h = harness(
            SimulatedActionExecutor::new().delay_action("restart", Duration::from_secs(5)),
            RecoveryConfig::default(),
        );
        h.engine.register_strategy(strategy).unwrap();
        h.engine.remove_strategy("restart-then-scale");

        let workflow = h.engine.recover(&trigger()).await.unwrap();
        assert!(workflow.attempts[0].actions[0].timed_out);
        assert_eq!(workflow.attempts[0].status, AttemptStatus::Failed);

        let stats = h.engine.stats();
        assert_eq!(stats.action_timeouts, 1);
        assert_eq!(stats.action_failures, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_no_matching_strategy() {
        let h = harness(SimulatedActionExecutor::new(), RecoveryConfig::default());
        let other = Trigger::new("disk_full", Severity::Low, "storage");
        assert!(matches!(
            h.engine.recover(&other).await,
            Err(RecoveryError::NoMatchingStrategy { .. })
        ));
    }
}
