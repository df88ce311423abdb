//! Workflow and attempt records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_types::{ActionType, AttemptId, CompletionRecord, EntityKind, WorkflowId};

use crate::context::RecoveryContext;
use crate::scoring::ScoreBreakdown;
use crate::strategy::RecoveryStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
    Paused,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

/// Outcome of one action within an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: String,
    pub action_type: ActionType,
    pub target: String,
    pub success: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub message: String,

    /// Rollback steps that ran for this action, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback: Vec<RollbackStep>,
}

/// One executed step of a rollback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub action_id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// A single execution of a strategy's action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    pub strategy_id: String,
    pub started_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub actions: Vec<ActionRecord>,
    pub duration_ms: u64,
    pub confidence: f64,
    pub error: Option<String>,
    pub result: Option<String>,
}

impl Attempt {
    pub fn new(strategy_id: &str, confidence: f64) -> Self {
        Self {
            id: AttemptId::generate(),
            strategy_id: strategy_id.to_string(),
            started_at: Utc::now(),
            status: AttemptStatus::Pending,
            actions: Vec::new(),
            duration_ms: 0,
            confidence,
            error: None,
            result: None,
        }
    }
}

/// Post-execution checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub error_resolved: bool,
    pub system_health: f64,
    pub component_health: BTreeMap<String, f64>,
    pub passed: bool,
}

/// A recovery workflow: one chosen strategy applied to one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub strategy: RecoveryStrategy,
    pub score: ScoreBreakdown,
    pub context: RecoveryContext,
    pub attempts: Vec<Attempt>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_duration_ms: u64,
    pub actual_duration_ms: Option<u64>,
    pub success: bool,
    pub verification: Option<VerificationOutcome>,
    pub reason: Option<String>,
    pub recommendations: Vec<String>,
}

impl Workflow {
    pub fn new(strategy: RecoveryStrategy, score: ScoreBreakdown, context: RecoveryContext) -> Self {
        Self {
            id: WorkflowId::generate(),
            estimated_duration_ms: strategy.estimated_duration().as_millis() as u64,
            strategy,
            score,
            context,
            attempts: Vec::new(),
            status: WorkflowStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            actual_duration_ms: None,
            success: false,
            verification: None,
            reason: None,
            recommendations: Vec::new(),
        }
    }

    pub fn trigger_id(&self) -> &str {
        self.context.trigger.id.as_str()
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether the originating error was resolved by this workflow.
    pub fn error_resolved(&self) -> bool {
        self.verification
            .as_ref()
            .is_some_and(|v| v.error_resolved)
    }

    pub fn completion_record(&self) -> CompletionRecord {
        let component_success = self
            .attempts
            .last()
            .map(|attempt| {
                attempt
                    .actions
                    .iter()
                    .map(|a| (a.action_id.clone(), a.success))
                    .collect()
            })
            .unwrap_or_default();

        CompletionRecord {
            entity: EntityKind::Workflow,
            id: self.id.to_string(),
            trigger_id: self.trigger_id().to_string(),
            status: self.status.to_string(),
            duration_ms: self.actual_duration_ms.unwrap_or(0),
            success: self.success,
            confidence: self
                .attempts
                .last()
                .map(|a| a.confidence)
                .unwrap_or(self.score.confidence_factor),
            component_success,
            reason: self.reason.clone(),
            recommendations: self.recommendations.clone(),
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
        }
    }
}
