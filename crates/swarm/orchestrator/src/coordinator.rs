//! Orchestration coordinator: the entry point of the swarm core.
//!
//! Every trigger becomes an [`Orchestration`]. The coordinator admits it
//! against its concurrency cap, picks an [`OrchestrationStrategy`], runs the
//! strategy's components against the resilience registry, the recovery
//! engine and the self-healing engine, and folds the component results into
//! an effectiveness ratio. Component failures never raise; they only lower
//! effectiveness.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use swarm_healing::SelfHealingEngine;
use swarm_recovery::RecoveryWorkflowEngine;
use swarm_resilience::{CircuitState, EndpointProber, ProtectedExecutor, ResilienceRegistry};
use swarm_types::{
    ActionExecutor, BoundedHistory, MetricsSource, MonitoringSink, OrchestrationId, RefusalRecord,
    ResourceUtilization, Severity, SystemMetrics, SystemStatusReport, TargetAchievement, Trigger,
    TriggerDraft,
};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::component::{ComponentExecution, ComponentKind, ComponentOutcome, ComponentStatus};
use crate::config::{OrchestratorConfig, SwarmConfig};
use crate::detection::{Complexity, DetectionProvider, DetectionReport};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestration::{
    Orchestration, OrchestrationMetrics, OrchestrationOutcome, OrchestrationStatus,
};
use crate::resources::{Claim, ResourceConflict, ResourceLedger};
use crate::strategy::{select_strategy, OrchestrationStrategy, SelectionInput};

const EVENT_CAPACITY: usize = 256;

/// External capabilities the coordinator is wired to.
pub struct Collaborators {
    pub executor: Arc<dyn ActionExecutor>,
    pub metrics: Arc<dyn MetricsSource>,
    pub sink: Arc<dyn MonitoringSink>,
    pub prober: Arc<dyn EndpointProber>,
    pub detector: Arc<dyn DetectionProvider>,
}

/// Progress notifications, in the order they happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    Started {
        id: OrchestrationId,
        trigger_id: String,
        strategy: OrchestrationStrategy,
    },
    Deferred {
        id: OrchestrationId,
        resources: Vec<String>,
    },
    ComponentFinished {
        id: OrchestrationId,
        component: ComponentKind,
        success: bool,
        timed_out: bool,
    },
    Completed {
        id: OrchestrationId,
        status: OrchestrationStatus,
        success: bool,
        effectiveness: f64,
    },
    Refused {
        trigger_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub stopped: u64,
    pub refused: u64,
    pub deferred: u64,
    pub conflicts: u64,
    pub timed_out_components: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    stopped: AtomicU64,
    refused: AtomicU64,
    deferred: AtomicU64,
    conflicts: AtomicU64,
    timed_out_components: AtomicU64,
}

pub struct OrchestrationCoordinator {
    config: RwLock<OrchestratorConfig>,
    resilience: Arc<ResilienceRegistry>,
    recovery: Arc<RecoveryWorkflowEngine>,
    healing: Arc<SelfHealingEngine>,
    detector: Arc<dyn DetectionProvider>,
    metrics: Arc<dyn MetricsSource>,
    sink: Arc<dyn MonitoringSink>,
    active: DashMap<OrchestrationId, Orchestration>,
    completed: Mutex<BoundedHistory<Orchestration>>,
    conflicts: Mutex<BoundedHistory<ResourceConflict>>,
    ledger: ResourceLedger,
    admission: Mutex<()>,
    accepting: AtomicBool,
    events: broadcast::Sender<OrchestrationEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    finished: Notify,
    counters: Counters,
}

impl OrchestrationCoordinator {
    /// Build the coordinator and every subsystem from one configuration.
    pub fn new(config: SwarmConfig, collaborators: Collaborators) -> OrchestratorResult<Self> {
        config.validate()?;

        let Collaborators {
            executor,
            metrics,
            sink,
            prober,
            detector,
        } = collaborators;

        let resilience = Arc::new(ResilienceRegistry::new(config.resilience, prober)?);
        let executor: Arc<dyn ActionExecutor> =
            Arc::new(ProtectedExecutor::new(executor, resilience.clone()));
        let recovery = RecoveryWorkflowEngine::new(
            config.recovery,
            executor.clone(),
            metrics.clone(),
            sink.clone(),
        )?;
        let healing = SelfHealingEngine::new(config.healing, executor, metrics.clone(), sink.clone())?;

        let orchestrator = config.orchestrator;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            resilience,
            recovery: Arc::new(recovery),
            healing: Arc::new(healing),
            detector,
            metrics,
            sink,
            active: DashMap::new(),
            completed: Mutex::new(BoundedHistory::new(orchestrator.history_limit)),
            conflicts: Mutex::new(BoundedHistory::new(orchestrator.conflict_history_limit)),
            ledger: ResourceLedger::new(),
            admission: Mutex::new(()),
            accepting: AtomicBool::new(true),
            events,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            finished: Notify::new(),
            counters: Counters::default(),
            config: RwLock::new(orchestrator),
        })
    }

    pub fn resilience(&self) -> &Arc<ResilienceRegistry> {
        &self.resilience
    }

    pub fn recovery(&self) -> &Arc<RecoveryWorkflowEngine> {
        &self.recovery
    }

    pub fn healing(&self) -> &Arc<SelfHealingEngine> {
        &self.healing
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.events.subscribe()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Push new configuration into every subsystem. Breakers and failover
    /// groups keep their state.
    #[instrument(skip(self, config))]
    pub fn apply_config(&self, config: SwarmConfig) -> OrchestratorResult<()> {
        config.validate()?;

        self.resilience.apply_config(config.resilience)?;
        self.recovery.apply_config(config.recovery)?;
        self.healing.apply_config(config.healing)?;

        let orchestrator = config.orchestrator;
        self.completed.lock().set_capacity(orchestrator.history_limit);
        self.conflicts
            .lock()
            .set_capacity(orchestrator.conflict_history_limit);
        *self.config.write() = orchestrator;
        info!("Swarm configuration applied");
        Ok(())
    }

    // ── Intake ───────────────────────────────────────────────────────

    /// Admit `trigger` and run its orchestration in the background.
    pub fn handle(self: &Arc<Self>, trigger: Trigger) -> OrchestratorResult<OrchestrationId> {
        let id = self.admit(&trigger)?;

        let coordinator = Arc::clone(self);
        let run_id = id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = coordinator.run(&run_id).await {
                debug!(orchestration_id = %run_id, error = %e, "Orchestration ended early");
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        Ok(id)
    }

    /// Complete an operator-submitted draft and handle it.
    pub fn manual_trigger(
        self: &Arc<Self>,
        draft: TriggerDraft,
    ) -> OrchestratorResult<OrchestrationId> {
        let trigger = draft.into_trigger();
        info!(trigger_id = %trigger.id, trigger_type = %trigger.trigger_type, "Manual trigger submitted");
        self.handle(trigger)
    }

    /// Admit `trigger` and run its orchestration to the end.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub async fn orchestrate(&self, trigger: Trigger) -> OrchestratorResult<Orchestration> {
        let id = self.admit(&trigger)?;
        self.run(&id).await
    }

    fn admit(&self, trigger: &Trigger) -> OrchestratorResult<OrchestrationId> {
        if !self.is_accepting() {
            return Err(self.refuse(trigger, OrchestratorError::ShuttingDown));
        }

        let _admission = self.admission.lock();
        let config = self.config.read().clone();
        let active = self.active.len();
        let limit = config.max_concurrent_orchestrations;
        if active >= limit {
            return Err(self.refuse(
                trigger,
                OrchestratorError::ConcurrencyExhausted { active, limit },
            ));
        }

        let decision = select_strategy(
            trigger,
            SelectionInput {
                active,
                limit,
                decision_threshold: config.decision_threshold,
            },
            &config.strategy_weights,
        );
        let orchestration = Orchestration::new(trigger.clone(), decision);
        let id = orchestration.id.clone();

        self.ledger.claim(Claim::new(
            id.clone(),
            trigger.source.clone(),
            trigger.affected_components(),
            orchestration.priority,
            orchestration.decision.confidence,
        ));
        info!(
            orchestration_id = %id,
            strategy = %orchestration.decision.strategy,
            score = orchestration.decision.score,
            rationale = %orchestration.decision.rationale,
            "Orchestration started"
        );
        let _ = self.events.send(OrchestrationEvent::Started {
            id: id.clone(),
            trigger_id: trigger.id.to_string(),
            strategy: orchestration.decision.strategy,
        });
        self.active.insert(id.clone(), orchestration);
        Ok(id)
    }

    fn refuse(&self, trigger: &Trigger, error: OrchestratorError) -> OrchestratorError {
        self.counters.refused.fetch_add(1, Ordering::Relaxed);
        let reason = error.to_string();
        self.sink.publish_refusal(RefusalRecord {
            trigger_id: trigger.id.to_string(),
            source: trigger.source.clone(),
            reason: reason.clone(),
            refused_at: Utc::now(),
        });
        let _ = self.events.send(OrchestrationEvent::Refused {
            trigger_id: trigger.id.to_string(),
            reason,
        });
        error
    }

    // ── Execution ────────────────────────────────────────────────────

    #[instrument(skip(self), fields(orchestration_id = %id))]
    async fn run(&self, id: &OrchestrationId) -> OrchestratorResult<Orchestration> {
        let (trigger, strategy) = {
            let entry = self
                .active
                .get(id)
                .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;
            (entry.trigger.clone(), entry.decision.strategy)
        };
        let started = Instant::now();
        let trigger = &trigger;

        match strategy {
            OrchestrationStrategy::DetectionFirst => {
                let (detection, _) = self.run_detection(id, trigger).await;
                if detection.completed() {
                    for kind in [
                        ComponentKind::Planning,
                        ComponentKind::Recovery,
                        ComponentKind::Verification,
                    ] {
                        self.component(id, kind, trigger).await;
                    }
                } else {
                    debug!("Detection failed, remaining components skipped");
                }
            }
            OrchestrationStrategy::RecoveryFirst => {
                let recovery = self.component(id, ComponentKind::Recovery, trigger).await;
                self.run_detection(id, trigger).await;
                if !recovery.completed() {
                    self.component(id, ComponentKind::SelfHealing, trigger).await;
                }
                self.component(id, ComponentKind::Verification, trigger).await;
            }
            OrchestrationStrategy::Parallel => {
                futures::join!(
                    self.run_detection(id, trigger),
                    self.component(id, ComponentKind::Recovery, trigger),
                    self.component(id, ComponentKind::Resilience, trigger),
                    self.component(id, ComponentKind::Monitoring, trigger),
                );
                self.component(id, ComponentKind::Verification, trigger).await;
            }
            OrchestrationStrategy::Adaptive => {
                let (_, report) = self.run_detection(id, trigger).await;
                let mut plan = vec![ComponentKind::Recovery];
                if report.severity == Severity::Critical {
                    plan.push(ComponentKind::Resilience);
                    plan.push(ComponentKind::SelfHealing);
                }
                if report.complexity == Complexity::High {
                    plan.push(ComponentKind::Monitoring);
                }
                plan.push(ComponentKind::Verification);
                for kind in plan {
                    self.component(id, kind, trigger).await;
                }
            }
        }

        self.finish(id, started)
    }

    /// Run detection. A failed detection yields the fallback report.
    async fn run_detection(
        &self,
        id: &OrchestrationId,
        trigger: &Trigger,
    ) -> (ComponentExecution, DetectionReport) {
        let execution = self.component(id, ComponentKind::Detection, trigger).await;

        let detected = self.active.get(id).and_then(|o| o.detection.clone());
        let report = match detected {
            Some(report) => report,
            None => {
                let report = DetectionReport::fallback(trigger);
                self.record_detection(id, &report);
                report
            }
        };
        (execution, report)
    }

    fn record_detection(&self, id: &OrchestrationId, report: &DetectionReport) {
        self.ledger
            .extend(id, report.affected_components.iter().cloned());
        if let Some(mut entry) = self.active.get_mut(id) {
            entry.detection = Some(report.clone());
        }
    }

    async fn component(
        &self,
        id: &OrchestrationId,
        kind: ComponentKind,
        trigger: &Trigger,
    ) -> ComponentExecution {
        if kind.is_recovery_type() {
            self.acquire_resources(id).await;
        }
        self.timed(id, kind, self.invoke(id, kind, trigger)).await
    }

    /// Run one component bounded by the default timeout and record it.
    async fn timed<F>(
        &self,
        id: &OrchestrationId,
        kind: ComponentKind,
        work: F,
    ) -> ComponentExecution
    where
        F: Future<Output = ComponentOutcome>,
    {
        let timeout = self.config.read().default_timeout;
        let started_at = Utc::now();
        let started = Instant::now();

        let (outcome, timed_out) = match tokio::time::timeout(timeout, work).await {
            Ok(outcome) => (outcome, false),
            Err(_) => (
                ComponentOutcome::failed(format!("timed out after {}ms", timeout.as_millis())),
                true,
            ),
        };

        let execution = ComponentExecution {
            component: kind,
            status: if outcome.success {
                ComponentStatus::Completed
            } else {
                ComponentStatus::Failed
            },
            timed_out,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            detail: outcome.detail,
            spawned: outcome.spawned,
        };
        self.record(id, &execution);
        execution
    }

    async fn invoke(
        &self,
        id: &OrchestrationId,
        kind: ComponentKind,
        trigger: &Trigger,
    ) -> ComponentOutcome {
        match kind {
            ComponentKind::Detection => match self.detector.detect(trigger).await {
                Ok(report) => {
                    self.record_detection(id, &report);
                    ComponentOutcome::new(
                        true,
                        format!(
                            "severity {}, complexity {}, {} affected",
                            report.severity,
                            report.complexity,
                            report.affected_components.len()
                        ),
                    )
                }
                Err(e) => ComponentOutcome::failed(e.to_string()),
            },
            ComponentKind::Planning => {
                let context = self.recovery.build_context(trigger).await;
                match self.recovery.select_strategy(&context) {
                    Ok(selection) => ComponentOutcome::new(
                        true,
                        format!(
                            "strategy {} scored {:.1}",
                            selection.strategy.id, selection.score.total
                        ),
                    ),
                    Err(e) => ComponentOutcome::failed(e.to_string()),
                }
            }
            ComponentKind::Recovery => match self.recovery.recover(trigger).await {
                Ok(workflow) => ComponentOutcome::new(
                    workflow.success,
                    format!("workflow {} with strategy {}", workflow.status, workflow.strategy.id),
                )
                .spawned(&workflow.id),
                Err(e) => ComponentOutcome::failed(e.to_string()),
            },
            ComponentKind::SelfHealing => match self.healing.heal(trigger).await {
                Ok(session) => ComponentOutcome::new(
                    session.success(),
                    format!("session {} with scenario {}", session.status, session.scenario_id),
                )
                .spawned(&session.id),
                Err(e) => ComponentOutcome::failed(e.to_string()),
            },
            ComponentKind::Resilience => self.protect(id).await,
            ComponentKind::Monitoring => {
                let system = self.metrics.system_metrics().await;
                let target = self.config.read().targets.min_system_health;
                ComponentOutcome::new(
                    system.health_score >= target,
                    format!(
                        "system health {:.2} (target {:.2})",
                        system.health_score, target
                    ),
                )
            }
            ComponentKind::Verification => {
                let resolved = self.metrics.is_resolved(trigger).await;
                let system = self.metrics.system_metrics().await;
                let target = self.config.read().targets.min_system_health;
                ComponentOutcome::new(
                    resolved && system.health_score >= target,
                    format!(
                        "resolved: {}, system health {:.2} (target {:.2})",
                        resolved, system.health_score, target
                    ),
                )
            }
        }
    }

    /// Check the breakers of every claimed resource and move traffic off
    /// resources whose circuit is open.
    async fn protect(&self, id: &OrchestrationId) -> ComponentOutcome {
        let resources = self.ledger.resources_of(id);
        let mut moved = Vec::new();
        let mut isolated = Vec::new();

        for resource in &resources {
            let groups = self.resilience.failovers_serving(resource);
            for group in &groups {
                group.probe_now().await;
            }

            let open = self
                .resilience
                .find_circuit_breaker(resource)
                .is_some_and(|b| b.state() == CircuitState::Open);
            if !open {
                continue;
            }

            let mut rerouted = false;
            for group in &groups {
                if group.active_endpoint() != *resource {
                    rerouted = true;
                    continue;
                }
                match group.manual_failover(None) {
                    Ok(target) => {
                        moved.push(format!("{} -> {}", resource, target));
                        rerouted = true;
                    }
                    Err(e) => {
                        warn!(resource = %resource, group = %group.name(), error = %e, "Failover refused");
                    }
                }
            }
            if !rerouted {
                isolated.push(resource.clone());
            }
        }

        let mut detail = format!("{} resources checked", resources.len());
        if !moved.is_empty() {
            detail.push_str(&format!(", moved {}", moved.join(", ")));
        }
        if !isolated.is_empty() {
            detail.push_str(&format!(", isolated {}", isolated.join(", ")));
        }
        ComponentOutcome::new(isolated.is_empty(), detail)
    }

    /// Wait for contested resources, bounded by the default timeout.
    async fn acquire_resources(&self, id: &OrchestrationId) {
        let (policy, timeout) = {
            let config = self.config.read();
            (config.conflict_policy, config.default_timeout)
        };
        let blockers = self.ledger.blockers(id, policy);
        if blockers.is_empty() {
            return;
        }

        let mut resources: Vec<String> = blockers.into_iter().map(|c| c.resource).collect();
        resources.sort();
        resources.dedup();

        self.counters.deferred.fetch_add(1, Ordering::Relaxed);
        if let Some(mut entry) = self.active.get_mut(id) {
            entry.status = OrchestrationStatus::Deferred;
        }
        info!(orchestration_id = %id, resources = ?resources, "Orchestration deferred");
        let _ = self.events.send(OrchestrationEvent::Deferred {
            id: id.clone(),
            resources: resources.clone(),
        });

        let (owned, waited) = self.ledger.wait_until_owned(id, policy, timeout).await;
        let waited_ms = waited.as_millis() as u64;

        if let Some(mut entry) = self.active.get_mut(id) {
            if entry.status == OrchestrationStatus::Deferred {
                entry.status = OrchestrationStatus::Running;
            }
            entry.metrics.deferred_ms += waited_ms;
            if !owned {
                entry.recommendations.push(format!(
                    "Proceeded without exclusive access to {} after waiting {}ms",
                    resources.join(", "),
                    waited_ms
                ));
            }
        }
        if !owned {
            warn!(orchestration_id = %id, waited_ms = waited_ms, "Deferral timed out, proceeding");
        }
    }

    fn record(&self, id: &OrchestrationId, execution: &ComponentExecution) {
        if execution.timed_out {
            self.counters
                .timed_out_components
                .fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            orchestration_id = %id,
            component = %execution.component,
            success = execution.completed(),
            timed_out = execution.timed_out,
            duration_ms = execution.duration_ms,
            "Component finished"
        );
        if let Some(mut entry) = self.active.get_mut(id) {
            entry.components.push(execution.clone());
        }
        let _ = self.events.send(OrchestrationEvent::ComponentFinished {
            id: id.clone(),
            component: execution.component,
            success: execution.completed(),
            timed_out: execution.timed_out,
        });
    }

    fn finish(&self, id: &OrchestrationId, started: Instant) -> OrchestratorResult<Orchestration> {
        let Some((_, mut orchestration)) = self.active.remove(id) else {
            let reason = self
                .completed
                .lock()
                .find(|o| &o.id == id)
                .and_then(|o| o.reason.clone())
                .unwrap_or_else(|| "removed".to_string());
            return Err(OrchestratorError::Stopped {
                id: id.clone(),
                reason,
            });
        };

        let outcome = OrchestrationOutcome::from_components(&orchestration.components);
        orchestration.metrics = OrchestrationMetrics::from_components(
            &orchestration.components,
            orchestration.metrics.deferred_ms,
        );
        orchestration.status = if outcome.success {
            OrchestrationStatus::Completed
        } else {
            OrchestrationStatus::Failed
        };
        if !outcome.success {
            orchestration.reason = failure_reason(&orchestration);
            let recommendations = recommendations(&orchestration);
            orchestration.recommendations.extend(recommendations);
        }
        orchestration.outcome = Some(outcome);
        orchestration.completed_at = Some(Utc::now());
        orchestration.duration_ms = Some(started.elapsed().as_millis() as u64);

        self.close(&orchestration);
        if orchestration.success() {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
            info!(
                orchestration_id = %id,
                effectiveness = orchestration.effectiveness(),
                "Orchestration completed"
            );
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                orchestration_id = %id,
                effectiveness = orchestration.effectiveness(),
                reason = ?orchestration.reason,
                "Orchestration failed"
            );
        }
        self.completed.lock().push(orchestration.clone());
        self.finished.notify_waiters();
        Ok(orchestration)
    }

    /// Release claims and publish the completion of a terminal orchestration.
    fn close(&self, orchestration: &Orchestration) {
        self.ledger.release(&orchestration.id);
        let _ = self.events.send(OrchestrationEvent::Completed {
            id: orchestration.id.clone(),
            status: orchestration.status,
            success: orchestration.success(),
            effectiveness: orchestration.effectiveness(),
        });
        self.sink.publish_completion(orchestration.completion_record());
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Force an active orchestration to `stopped`.
    pub fn stop(&self, id: &OrchestrationId, reason: &str) -> OrchestratorResult<()> {
        let (_, mut orchestration) = self
            .active
            .remove(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;

        let mut outcome = OrchestrationOutcome::from_components(&orchestration.components);
        outcome.success = false;
        orchestration.metrics = OrchestrationMetrics::from_components(
            &orchestration.components,
            orchestration.metrics.deferred_ms,
        );
        orchestration.outcome = Some(outcome);
        orchestration.status = OrchestrationStatus::Stopped;
        orchestration.reason = Some(reason.to_string());
        orchestration
            .recommendations
            .push("Resubmit the trigger once the coordinator is available again".to_string());
        let now = Utc::now();
        orchestration.completed_at = Some(now);
        orchestration.duration_ms =
            Some((now - orchestration.created_at).num_milliseconds().max(0) as u64);

        self.counters.stopped.fetch_add(1, Ordering::Relaxed);
        warn!(orchestration_id = %id, reason = %reason, "Orchestration stopped");
        self.close(&orchestration);
        self.completed.lock().push(orchestration);
        self.finished.notify_waiters();
        Ok(())
    }

    /// Stop accepting triggers, give active orchestrations the shutdown
    /// grace period, then stop whatever is left. Returns the stopped ids.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Vec<OrchestrationId> {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);

        let grace = self.config.read().shutdown_timeout;
        let deadline = Instant::now() + grace;
        info!(active = self.active.len(), grace_ms = grace.as_millis() as u64, "Shutting down");

        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        // Aborted orchestrations fail their own workflows and sessions.
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        let ids: Vec<OrchestrationId> = self.active.iter().map(|o| o.key().clone()).collect();
        let stopped: Vec<OrchestrationId> = ids
            .into_iter()
            .filter(|id| self.stop(id, "shutdown").is_ok())
            .collect();
        let workflows = self.recovery.cancel_all("shutdown");
        let sessions = self.healing.cancel_all("shutdown");
        self.resilience.join_probes().await;

        info!(
            stopped = stopped.len(),
            workflows = workflows.len(),
            sessions = sessions.len(),
            "Shutdown complete"
        );
        stopped
    }

    // ── Resources ────────────────────────────────────────────────────

    /// Recompute utilization, record new conflicts and publish status.
    pub async fn run_resource_tick(&self) -> SystemStatusReport {
        let policy = self.config.read().conflict_policy;
        for conflict in self.ledger.new_conflicts(policy) {
            self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
            info!(
                kind = %conflict.kind,
                resource = %conflict.resource,
                winner = %conflict.winner,
                deferred = %conflict.deferred,
                "Resource conflict"
            );
            self.conflicts.lock().push(conflict);
        }

        let status = self.system_status().await;
        self.sink.publish_status(status.clone());
        status
    }

    pub async fn system_status(&self) -> SystemStatusReport {
        let system = self.metrics.system_metrics().await;
        let targets = self.config.read().targets.clone();
        let utilization = self.utilization(&system);

        let average_effectiveness = {
            let completed = self.completed.lock();
            if completed.is_empty() {
                1.0
            } else {
                completed.iter().map(|o| o.effectiveness()).sum::<f64>() / completed.len() as f64
            }
        };

        SystemStatusReport {
            system_health: system.health_score,
            active_orchestrations: self.active.len(),
            average_effectiveness,
            targets: TargetAchievement {
                health_target_met: system.health_score >= targets.min_system_health,
                effectiveness_target_met: average_effectiveness >= targets.min_effectiveness,
                utilization_target_met: utilization.cpu <= targets.max_utilization
                    && utilization.memory <= targets.max_utilization,
            },
            resource_utilization: utilization,
            reported_at: Utc::now(),
        }
    }

    fn utilization(&self, system: &SystemMetrics) -> ResourceUtilization {
        ResourceUtilization {
            cpu: system.cpu,
            memory: system.memory,
            network: system.network,
            active_recoveries: self.recovery.active_count() + self.healing.active_count(),
            queued: self
                .active
                .iter()
                .filter(|o| o.status == OrchestrationStatus::Deferred)
                .count(),
        }
    }

    /// Start the failover probe loops and the resource tick. They stop on
    /// [`shutdown`](Self::shutdown), which also waits for the probe loops.
    /// The returned handle is the resource tick.
    pub fn start_background(self: &Arc<Self>) -> JoinHandle<()> {
        self.resilience.start_probing(self.shutdown.subscribe());

        let coordinator = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut period = coordinator.config.read().resource_tick;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.run_resource_tick().await;

                        let current = coordinator.config.read().resource_tick;
                        if current != period {
                            period = current;
                            ticker = interval(period);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            ticker.reset();
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Resource tick loop stopped");
        })
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn get(&self, id: &OrchestrationId) -> Option<Orchestration> {
        if let Some(orchestration) = self.active.get(id) {
            return Some(orchestration.clone());
        }
        self.completed.lock().find(|o| &o.id == id).cloned()
    }

    pub fn active(&self) -> Vec<Orchestration> {
        self.active.iter().map(|o| o.value().clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Completed orchestrations, oldest first.
    pub fn completed(&self) -> Vec<Orchestration> {
        self.completed.lock().iter().cloned().collect()
    }

    /// Recorded conflicts, oldest first.
    pub fn conflict_history(&self) -> Vec<ResourceConflict> {
        self.conflicts.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.counters;
        CoordinatorStats {
            active: self.active.len(),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            stopped: c.stopped.load(Ordering::Relaxed),
            refused: c.refused.load(Ordering::Relaxed),
            deferred: c.deferred.load(Ordering::Relaxed),
            conflicts: c.conflicts.load(Ordering::Relaxed),
            timed_out_components: c.timed_out_components.load(Ordering::Relaxed),
        }
    }
}

fn failure_reason(orchestration: &Orchestration) -> Option<String> {
    let failed: Vec<String> = orchestration
        .components
        .iter()
        .filter(|c| !c.completed())
        .map(|c| format!("{} failed: {}", c.component, c.detail))
        .collect();
    if failed.is_empty() {
        Some("no component ran".to_string())
    } else {
        Some(failed.join("; "))
    }
}

fn recommendations(orchestration: &Orchestration) -> Vec<String> {
    let trigger = &orchestration.trigger;
    let mut out = Vec::new();
    for component in orchestration.components.iter().filter(|c| !c.completed()) {
        if component.timed_out {
            out.push(format!(
                "Raise default_timeout_ms or investigate the slow {} component",
                component.component
            ));
            continue;
        }
        let advice = match component.component {
            ComponentKind::Detection => {
                "Check the detection provider; without its report the plan was reduced".to_string()
            }
            ComponentKind::Planning | ComponentKind::Recovery => format!(
                "Review the recovery strategies covering trigger type {}",
                trigger.trigger_type
            ),
            ComponentKind::SelfHealing => format!(
                "Add or tune a healing scenario for category {}",
                trigger.category
            ),
            ComponentKind::Resilience => format!(
                "Dependencies of {} remain isolated by open circuits",
                trigger.source
            ),
            ComponentKind::Monitoring | ComponentKind::Verification => format!(
                "Keep {} under observation until health is back above target",
                trigger.source
            ),
        };
        out.push(advice);
    }
    out.dedup();
    out
}
