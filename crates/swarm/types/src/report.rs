//! Records published to the external monitoring and reporting subsystem.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Kind of entity a completion record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workflow,
    HealingSession,
    Orchestration,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Workflow => write!(f, "workflow"),
            EntityKind::HealingSession => write!(f, "healing_session"),
            EntityKind::Orchestration => write!(f, "orchestration"),
        }
    }
}

/// Emitted whenever a workflow, session or orchestration terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub entity: EntityKind,
    pub id: String,
    pub trigger_id: String,
    pub status: String,
    pub duration_ms: u64,
    pub success: bool,
    pub confidence: f64,
    /// Success per component, action or verification step.
    pub component_success: BTreeMap<String, bool>,
    pub reason: Option<String>,
    pub recommendations: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Refusal of a trigger at the coordinator's admission gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefusalRecord {
    pub trigger_id: String,
    pub source: String,
    pub reason: String,
    pub refused_at: DateTime<Utc>,
}

/// Resource utilization snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    pub active_recoveries: usize,
    pub queued: usize,
}

/// Whether the system currently meets its operating targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetAchievement {
    pub health_target_met: bool,
    pub effectiveness_target_met: bool,
    pub utilization_target_met: bool,
}

/// Periodic system status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatusReport {
    pub system_health: f64,
    pub resource_utilization: ResourceUtilization,
    pub active_orchestrations: usize,
    /// Mean effectiveness over the completed history.
    pub average_effectiveness: f64,
    pub targets: TargetAchievement,
    pub reported_at: DateTime<Utc>,
}

/// Output port towards the monitoring subsystem.
pub trait MonitoringSink: Send + Sync {
    fn publish_completion(&self, record: CompletionRecord);

    fn publish_status(&self, status: SystemStatusReport);

    fn publish_refusal(&self, refusal: RefusalRecord);
}

/// Sink that writes every record as a structured log event.
pub struct TracingSink;

impl MonitoringSink for TracingSink {
    fn publish_completion(&self, record: CompletionRecord) {
        info!(
            entity = %record.entity,
            id = %record.id,
            trigger_id = %record.trigger_id,
            status = %record.status,
            success = record.success,
            duration_ms = record.duration_ms,
            confidence = record.confidence,
            "Completion record"
        );
    }

    fn publish_status(&self, status: SystemStatusReport) {
        info!(
            system_health = status.system_health,
            active = status.active_orchestrations,
            cpu = status.resource_utilization.cpu,
            memory = status.resource_utilization.memory,
            effectiveness = status.average_effectiveness,
            "System status"
        );
    }

    fn publish_refusal(&self, refusal: RefusalRecord) {
        warn!(
            trigger_id = %refusal.trigger_id,
            source = %refusal.source,
            reason = %refusal.reason,
            "Trigger refused"
        );
    }
}

/// Sink that keeps everything in memory.
#[derive(Default)]
pub struct MemorySink {
    completions: Mutex<Vec<CompletionRecord>>,
    statuses: Mutex<Vec<SystemStatusReport>>,
    refusals: Mutex<Vec<RefusalRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completions(&self) -> Vec<CompletionRecord> {
        self.completions.lock().clone()
    }

    pub fn completions_for(&self, entity: EntityKind) -> Vec<CompletionRecord> {
        self.completions
            .lock()
            .iter()
            .filter(|r| r.entity == entity)
            .cloned()
            .collect()
    }

    pub fn statuses(&self) -> Vec<SystemStatusReport> {
        self.statuses.lock().clone()
    }

    pub fn refusals(&self) -> Vec<RefusalRecord> {
        self.refusals.lock().clone()
    }
}

impl MonitoringSink for MemorySink {
    fn publish_completion(&self, record: CompletionRecord) {
        self.completions.lock().push(record);
    }

    fn publish_status(&self, status: SystemStatusReport) {
        self.statuses.lock().push(status);
    }

    fn publish_refusal(&self, refusal: RefusalRecord) {
        self.refusals.lock().push(refusal);
    }
}
