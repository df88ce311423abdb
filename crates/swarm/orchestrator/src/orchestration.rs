//! Orchestration records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_types::{CompletionRecord, EntityKind, OrchestrationId, Trigger};

use crate::component::{ComponentExecution, ComponentKind};
use crate::detection::DetectionReport;
use crate::strategy::StrategyDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Running,
    /// Waiting for contested resources before recovery components.
    Deferred,
    Completed,
    Failed,
    /// Forcibly ended, e.g. by shutdown.
    Stopped,
}

impl OrchestrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed | OrchestrationStatus::Failed | OrchestrationStatus::Stopped
        )
    }
}

impl fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestrationStatus::Running => "running",
            OrchestrationStatus::Deferred => "deferred",
            OrchestrationStatus::Completed => "completed",
            OrchestrationStatus::Failed => "failed",
            OrchestrationStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Aggregated result over the attempted components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationOutcome {
    /// Every attempted component completed.
    pub success: bool,
    /// completed / attempted.
    pub effectiveness: f64,
    /// A recovery or self_healing component completed.
    pub error_resolved: bool,
    /// A monitoring or verification component completed.
    pub system_stabilized: bool,
}

impl OrchestrationOutcome {
    pub fn from_components(components: &[ComponentExecution]) -> Self {
        let attempted = components.len();
        let completed = components.iter().filter(|c| c.completed()).count();
        Self {
            success: completed == attempted,
            effectiveness: if attempted == 0 {
                0.0
            } else {
                completed as f64 / attempted as f64
            },
            error_resolved: components
                .iter()
                .any(|c| c.completed() && c.component.is_recovery_type()),
            system_stabilized: components
                .iter()
                .any(|c| c.completed() && c.component.is_monitoring_type()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationMetrics {
    pub attempted_components: usize,
    pub completed_components: usize,
    pub failed_components: usize,
    pub timed_out_components: usize,
    /// Time spent waiting for contested resources.
    pub deferred_ms: u64,
}

impl OrchestrationMetrics {
    pub fn from_components(components: &[ComponentExecution], deferred_ms: u64) -> Self {
        let completed = components.iter().filter(|c| c.completed()).count();
        Self {
            attempted_components: components.len(),
            completed_components: completed,
            failed_components: components.len() - completed,
            timed_out_components: components.iter().filter(|c| c.timed_out).count(),
            deferred_ms,
        }
    }
}

/// Top-level record for one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orchestration {
    pub id: OrchestrationId,
    pub trigger: Trigger,
    /// Severity rank of the trigger, used by the priority conflict policy.
    pub priority: u8,
    pub decision: StrategyDecision,
    pub detection: Option<DetectionReport>,
    pub components: Vec<ComponentExecution>,
    pub status: OrchestrationStatus,
    pub outcome: Option<OrchestrationOutcome>,
    pub metrics: OrchestrationMetrics,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub reason: Option<String>,
    pub recommendations: Vec<String>,
}

impl Orchestration {
    pub fn new(trigger: Trigger, decision: StrategyDecision) -> Self {
        Self {
            id: OrchestrationId::generate(),
            priority: trigger.severity.rank(),
            trigger,
            decision,
            detection: None,
            components: Vec::new(),
            status: OrchestrationStatus::Running,
            outcome: None,
            metrics: OrchestrationMetrics::default(),
            created_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            reason: None,
            recommendations: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn success(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }

    pub fn effectiveness(&self) -> f64 {
        self.outcome.as_ref().map(|o| o.effectiveness).unwrap_or(0.0)
    }

    pub fn execution(&self, component: ComponentKind) -> Option<&ComponentExecution> {
        self.components.iter().find(|c| c.component == component)
    }

    /// Spawned workflow and session ids.
    pub fn spawned(&self) -> Vec<&str> {
        self.components
            .iter()
            .filter_map(|c| c.spawned.as_deref())
            .collect()
    }

    pub fn completion_record(&self) -> CompletionRecord {
        let component_success: BTreeMap<String, bool> = self
            .components
            .iter()
            .map(|c| (c.component.to_string(), c.completed()))
            .collect();

        CompletionRecord {
            entity: EntityKind::Orchestration,
            id: self.id.to_string(),
            trigger_id: self.trigger.id.as_str().to_string(),
            status: self.status.to_string(),
            duration_ms: self.duration_ms.unwrap_or(0),
            success: self.success(),
            confidence: self.decision.confidence,
            component_success,
            reason: self.reason.clone(),
            recommendations: self.recommendations.clone(),
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
        }
    }
}
